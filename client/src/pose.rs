//! Synthetic avatar pose with per-frame jitter

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Tracked targets and their rest position (x, y, z) in meters
const REST_POSE: [(&str, [f32; 3]); 6] = [
    ("head", [0.0, 1.70, 0.0]),
    ("hip", [0.0, 1.00, 0.0]),
    ("left_hand", [-0.35, 1.10, 0.15]),
    ("right_hand", [0.35, 1.10, 0.15]),
    ("left_foot", [-0.15, 0.05, 0.0]),
    ("right_foot", [0.15, 0.05, 0.0]),
];

const DEFAULT_JITTER: f32 = 0.02;

/// Produces one `(target, payload)` list per frame
///
/// Payloads are `x,y,z,qx,qy,qz,qw` with three decimals, centered on a rest
/// pose and offset by the avatar's root position.
pub struct PoseGenerator {
    rng: StdRng,
    jitter: f32,
    root: [f32; 3],
    clothes: Option<String>,
    frame: u64,
}

impl PoseGenerator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic generator for reproducible runs
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            jitter: DEFAULT_JITTER,
            root: [0.0; 3],
            clothes: None,
            frame: 0,
        }
    }

    pub fn set_jitter(&mut self, jitter: f32) {
        self.jitter = jitter.abs();
    }

    pub fn set_root(&mut self, root: [f32; 3]) {
        self.root = root;
    }

    /// Attaches clothes state to every frame
    pub fn set_clothes(&mut self, clothes: Option<String>) {
        self.clothes = clothes;
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame
    }

    pub fn next_frame(&mut self) -> Vec<(String, String)> {
        self.frame += 1;
        let root = self.root;

        let mut targets: Vec<(String, String)> = REST_POSE
            .iter()
            .map(|(name, rest)| {
                let position: Vec<f32> = rest
                    .iter()
                    .zip(root.iter())
                    .map(|(rest, root)| rest + root + self.offset())
                    .collect();
                let payload = format!(
                    "{:.3},{:.3},{:.3},0.000,0.000,0.000,1.000",
                    position[0], position[1], position[2]
                );
                (name.to_string(), payload)
            })
            .collect();

        if let Some(clothes) = &self.clothes {
            targets.push(("CLOTHES".to_string(), clothes.clone()));
        }

        targets
    }

    fn offset(&mut self) -> f32 {
        if self.jitter == 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-self.jitter..=self.jitter)
    }
}

impl Default for PoseGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_has_every_target() {
        let mut pose = PoseGenerator::seeded(1);
        let frame = pose.next_frame();

        assert_eq!(frame.len(), REST_POSE.len());
        assert_eq!(frame[0].0, "head");
        assert!(frame
            .iter()
            .all(|(_, payload)| payload.split(',').count() == 7));
        assert_eq!(pose.frames_generated(), 1);
    }

    #[test]
    fn test_no_jitter_is_rest_pose() {
        let mut pose = PoseGenerator::seeded(1);
        pose.set_jitter(0.0);
        pose.set_root([1.0, 0.0, 2.0]);

        let frame = pose.next_frame();
        assert_eq!(
            frame[1],
            (
                "hip".to_string(),
                "1.000,1.000,2.000,0.000,0.000,0.000,1.000".to_string()
            )
        );
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut pose = PoseGenerator::seeded(7);
        pose.set_jitter(0.01);

        for _ in 0..50 {
            let frame = pose.next_frame();
            let head: Vec<f32> = frame[0]
                .1
                .split(',')
                .take(3)
                .map(|v| v.parse().unwrap())
                .collect();
            assert!((head[1] - 1.70).abs() <= 0.0105);
        }
    }

    #[test]
    fn test_seeded_frames_repeat() {
        let mut a = PoseGenerator::seeded(42);
        let mut b = PoseGenerator::seeded(42);
        assert_eq!(a.next_frame(), b.next_frame());
    }

    #[test]
    fn test_clothes_appended() {
        let mut pose = PoseGenerator::seeded(3);
        pose.set_clothes(Some("shirt_red".to_string()));

        let frame = pose.next_frame();
        assert_eq!(
            frame.last(),
            Some(&("CLOTHES".to_string(), "shirt_red".to_string()))
        );
    }
}
