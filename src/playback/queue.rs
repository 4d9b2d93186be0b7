use crate::api::models::{RankMetric, Track};
use rand::Rng;
use serde::Serialize;

/// Chance that a crowd favorite is front-loaded on shuffle.
const FAVORITE_BIAS: f64 = 0.7;
/// Vote floor for a track to count as a crowd favorite.
const FAVORITE_MIN_VOTES: i64 = 3;
const MIN_WEIGHT: f64 = 0.1;

/// Read-only queue view for snapshots and events.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueView {
    pub order: Vec<usize>,
    pub current_index: usize,
    pub shuffled: bool,
}

/// Ordering of the playable tracks: a stable `original_order` plus the active
/// `order`, which is either equal to it or a weighted-shuffle permutation.
///
/// Invariants: `order` is always a permutation of `[0, tracks.len())`, and
/// `current` is a valid index into it whenever the queue is non-empty.
pub struct PlayQueue {
    tracks: Vec<Track>,
    original_order: Vec<usize>,
    order: Vec<usize>,
    current: usize,
    shuffled: bool,
    metric: RankMetric,
}

impl PlayQueue {
    pub fn new(metric: RankMetric) -> Self {
        Self {
            tracks: Vec::new(),
            original_order: Vec::new(),
            order: Vec::new(),
            current: 0,
            shuffled: false,
            metric,
        }
    }

    /// Install a (possibly refreshed) playable track list.
    ///
    /// Re-initialization must not disturb an in-progress session: the active
    /// order survives when the list length is unchanged (a vote refresh), and
    /// `current` is only reset when it falls out of bounds.
    pub fn initialize(&mut self, playable: Vec<Track>) {
        let n = playable.len();
        self.tracks = playable;
        self.original_order = (0..n).collect();
        if self.order.len() != n {
            // A changed list invalidates any installed permutation
            self.order = (0..n).collect();
            self.shuffled = false;
        }
        if self.current >= n {
            self.current = 0;
        }
    }

    pub fn set_metric(&mut self, metric: RankMetric) {
        self.metric = metric;
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffled
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.order.get(self.current).and_then(|&i| self.tracks.get(i))
    }

    pub fn track_at(&self, queue_position: usize) -> Option<&Track> {
        self.order
            .get(queue_position)
            .and_then(|&i| self.tracks.get(i))
    }

    /// Select a queue position directly (user clicked a row).
    pub fn jump_to(&mut self, queue_position: usize) -> bool {
        if queue_position < self.order.len() {
            self.current = queue_position;
            true
        } else {
            false
        }
    }

    /// Move forward with wraparound. A single-entry queue is a no-op so it
    /// never appears to restart.
    pub fn advance(&mut self) -> bool {
        let len = self.order.len();
        if len <= 1 {
            return false;
        }
        self.current = (self.current + 1) % len;
        true
    }

    pub fn retreat(&mut self) -> bool {
        let len = self.order.len();
        if len <= 1 {
            return false;
        }
        self.current = (self.current + len - 1) % len;
        true
    }

    /// One-shot weighted shuffle of the remaining queue. `exclude` (the
    /// currently playing playable index) is prepended so shuffling never
    /// restarts the current track.
    pub fn weighted_shuffle(&mut self, exclude: Option<usize>) {
        self.order = self.weighted_order(exclude, &mut rand::thread_rng());
        self.current = 0;
        self.shuffled = true;
    }

    /// Shuffle on: new shuffled queue anchored at the current track.
    /// Shuffle off: original order rotated so the playing track stays at
    /// position 0 when present, verbatim otherwise.
    pub fn toggle_shuffle(&mut self) -> bool {
        let playing = self.order.get(self.current).copied();
        if self.shuffled {
            self.order = self.original_order.clone();
            if let Some(idx) = playing {
                if let Some(p) = self.order.iter().position(|&i| i == idx) {
                    self.order.rotate_left(p);
                }
            }
            self.current = 0;
            self.shuffled = false;
        } else {
            self.weighted_shuffle(playing);
        }
        self.shuffled
    }

    pub fn view(&self) -> QueueView {
        QueueView {
            order: self.order.clone(),
            current_index: self.current,
            shuffled: self.shuffled,
        }
    }

    fn weighted_order(&self, exclude: Option<usize>, rng: &mut impl Rng) -> Vec<usize> {
        let n = self.tracks.len();
        let mut rest: Vec<usize> = (0..n).filter(|&i| Some(i) != exclude).collect();
        let mut out = Vec::with_capacity(n);

        // Front-load a crowd favorite most of the time
        if rng.gen::<f64>() < FAVORITE_BIAS {
            let favorite = rest
                .iter()
                .enumerate()
                .filter(|(_, &i)| self.tracks[i].vote_score > FAVORITE_MIN_VOTES)
                .max_by_key(|(_, &i)| self.tracks[i].vote_score)
                .map(|(pos, _)| pos);
            if let Some(pos) = favorite {
                out.push(rest.remove(pos));
            }
        }

        // Cumulative-weight roulette, without replacement
        while !rest.is_empty() {
            let total: f64 = rest.iter().map(|&i| self.weight_of(i)).sum();
            let mut target = rng.gen::<f64>() * total;
            let mut pick = rest.len() - 1;
            for (pos, &i) in rest.iter().enumerate() {
                target -= self.weight_of(i);
                if target <= 0.0 {
                    pick = pos;
                    break;
                }
            }
            out.push(rest.remove(pick));
        }

        if let Some(current) = exclude {
            out.insert(0, current);
        }
        out
    }

    fn weight_of(&self, idx: usize) -> f64 {
        let track = &self.tracks[idx];
        let votes = (track.vote_score + 5).max(0) as f64;
        let base = (votes + 1.0).powf(1.2);
        (base * self.mode_modifier(track)).max(MIN_WEIGHT)
    }

    /// Boost tracks matching the active ranking metric proportionally to the
    /// feature's value; neutral when the metric is votes or the feature is
    /// absent.
    fn mode_modifier(&self, track: &Track) -> f64 {
        match self.metric {
            RankMetric::Votes => 1.0,
            RankMetric::Tempo => track
                .tempo
                .map(|bpm| (1.0 + bpm / 200.0).min(2.0))
                .unwrap_or(1.0),
            RankMetric::Energy | RankMetric::Danceability => self
                .metric
                .feature_of(track)
                .map(|v| 1.0 + v.clamp(0.0, 1.0))
                .unwrap_or(1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn track(id: &str, votes: i64) -> Track {
        Track {
            id: id.into(),
            provider_id: Some(format!("p-{}", id)),
            title: format!("Title {}", id),
            artist: format!("Artist {}", id),
            album_art_url: None,
            vote_score: votes,
            tempo: None,
            energy: None,
            danceability: None,
            preview_url: None,
        }
    }

    fn queue_with(votes: &[i64]) -> PlayQueue {
        let tracks = votes
            .iter()
            .enumerate()
            .map(|(i, &v)| track(&format!("t{}", i), v))
            .collect();
        let mut q = PlayQueue::new(RankMetric::Votes);
        q.initialize(tracks);
        q
    }

    fn assert_permutation(order: &[usize], n: usize) {
        let mut seen = vec![false; n];
        assert_eq!(order.len(), n);
        for &i in order {
            assert!(i < n, "index {} out of range", i);
            assert!(!seen[i], "index {} repeated", i);
            seen[i] = true;
        }
    }

    #[test]
    fn weighted_order_is_always_a_permutation() {
        let q = queue_with(&[5, 0, -2, 12, 3, -9, 1]);
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let order = q.weighted_order(None, &mut rng);
            assert_permutation(&order, 7);
        }
    }

    #[test]
    fn exclude_keeps_current_track_first() {
        let q = queue_with(&[5, 0, -2, 12]);
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let order = q.weighted_order(Some(2), &mut rng);
            assert_permutation(&order, 4);
            assert_eq!(order[0], 2);
        }
    }

    #[test]
    fn weights_follow_vote_curve() {
        let q = queue_with(&[5, 0, -2, -20]);
        // ((votes+5)+1)^1.2
        assert!((q.weight_of(0) - 11f64.powf(1.2)).abs() < 1e-9);
        assert!((q.weight_of(1) - 6f64.powf(1.2)).abs() < 1e-9);
        assert!((q.weight_of(2) - 4f64.powf(1.2)).abs() < 1e-9);
        // Deeply negative votes floor at (0+1)^1.2 = 1
        assert!((q.weight_of(3) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn metric_modifier_boosts_feature() {
        let mut energetic = track("e", 0);
        energetic.energy = Some(0.8);
        let plain = track("p", 0);

        let mut q = PlayQueue::new(RankMetric::Energy);
        q.initialize(vec![energetic, plain]);
        assert!(q.weight_of(0) > q.weight_of(1));
        assert!((q.weight_of(0) / q.weight_of(1) - 1.8).abs() < 1e-9);

        // Absent feature is neutral, not zero
        q.set_metric(RankMetric::Danceability);
        assert!((q.weight_of(0) - q.weight_of(1)).abs() < 1e-9);
    }

    #[test]
    fn advance_on_single_track_queue_is_a_no_op() {
        let mut q = queue_with(&[5]);
        assert!(!q.advance());
        assert_eq!(q.current_index(), 0);
        assert!(!q.retreat());
        assert_eq!(q.current_index(), 0);
    }

    #[test]
    fn advance_and_retreat_wrap_around() {
        let mut q = queue_with(&[1, 2, 3]);
        assert!(q.advance());
        assert!(q.advance());
        assert_eq!(q.current_index(), 2);
        assert!(q.advance());
        assert_eq!(q.current_index(), 0);
        assert!(q.retreat());
        assert_eq!(q.current_index(), 2);
    }

    #[test]
    fn toggle_twice_restores_original_rotated_to_current() {
        let mut q = queue_with(&[4, 3, 2, 1]);
        q.jump_to(2);
        let playing = q.current_track().unwrap().id.clone();

        q.toggle_shuffle();
        assert!(q.is_shuffled());
        assert_eq!(q.current_index(), 0);
        assert_eq!(q.current_track().unwrap().id, playing);

        q.toggle_shuffle();
        assert!(!q.is_shuffled());
        assert_eq!(q.current_index(), 0);
        assert_eq!(q.current_track().unwrap().id, playing);
        // Original order rotated so the playing track leads
        assert_eq!(q.view().order, vec![2, 3, 0, 1]);
    }

    #[test]
    fn reinitialize_with_same_length_preserves_session() {
        let mut q = queue_with(&[5, 0, -2]);
        q.weighted_shuffle(None);
        q.advance();
        let order = q.view().order;
        let current = q.current_index();

        // Vote refresh: same tracks, new scores
        let refreshed = vec![track("t0", 9), track("t1", 2), track("t2", 0)];
        q.initialize(refreshed);
        assert_eq!(q.view().order, order);
        assert_eq!(q.current_index(), current);
        assert!(q.is_shuffled());
    }

    #[test]
    fn reinitialize_with_new_length_resets_order() {
        let mut q = queue_with(&[5, 0, -2]);
        q.weighted_shuffle(None);
        q.jump_to(2);

        q.initialize(vec![track("a", 1), track("b", 2)]);
        assert_eq!(q.view().order, vec![0, 1]);
        assert!(!q.is_shuffled());
        // current was out of bounds, so it resets
        assert_eq!(q.current_index(), 0);
    }

    #[test]
    fn play_all_scenario_yields_valid_queue() {
        // Room has A(votes=5), B(votes=0), C(votes=-2), sort mode votes
        let mut q = queue_with(&[5, 0, -2]);
        q.weighted_shuffle(None);
        assert_permutation(&q.view().order, 3);
        assert_eq!(q.current_index(), 0);
        assert!(q.current_track().is_some());
    }
}
