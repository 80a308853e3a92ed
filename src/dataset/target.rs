use serde::{Serialize, Deserialize};

use crate::volume::Chunk;

/// What the network is trained to predict from a label volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Nearest-neighbour affinities along z, y and x (neuron segmentation).
    #[default]
    Affinity,
    /// Binary `label != 0` mask (synapse detection).
    Foreground,
}

impl TargetKind {
    pub fn channels(&self) -> usize {
        match self {
            TargetKind::Affinity => 3,
            TargetKind::Foreground => 1,
        }
    }

    /// Directory names used when predictions are written out.
    pub fn channel_names(&self) -> &'static [&'static str] {
        match self {
            TargetKind::Affinity => &["affinity_z", "affinity_y", "affinity_x"],
            TargetKind::Foreground => &["foreground"],
        }
    }

    pub fn compute(&self, label: &Chunk<u32>) -> Vec<Chunk<f64>> {
        match self {
            TargetKind::Affinity => affinity(label),
            TargetKind::Foreground => {
                vec![label.map(|id| if id != 0 { 1.0 } else { 0.0 })]
            }
        }
    }
}

/// Channel `a` at `v` is 1 when `v` and its predecessor along axis `a`
/// carry the same nonzero id. The first plane along each axis is 0.
fn affinity(label: &Chunk<u32>) -> Vec<Chunk<f64>> {
    let shape = label.shape();
    let [sz, sy, sx] = shape;
    let mut channels = vec![Chunk::new(shape, 0.0); 3];

    for z in 0..sz {
        for y in 0..sy {
            for x in 0..sx {
                let id = label.get(z, y, x);
                if id == 0 {
                    continue;
                }
                if z > 0 && label.get(z - 1, y, x) == id {
                    channels[0].set(z, y, x, 1.0);
                }
                if y > 0 && label.get(z, y - 1, x) == id {
                    channels[1].set(z, y, x, 1.0);
                }
                if x > 0 && label.get(z, y, x - 1) == id {
                    channels[2].set(z, y, x, 1.0);
                }
            }
        }
    }
    channels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affinity_boundaries() {
        // Two segments split along x, with background in the corner.
        let label = Chunk::from_vec(
            [2, 1, 3],
            vec![
                1, 1, 2, //
                1, 0, 2,
            ],
        )
        .unwrap();
        let aff = TargetKind::Affinity.compute(&label);
        assert_eq!(aff.len(), 3);

        // z affinity: section 1 matches section 0 where ids agree and are nonzero.
        assert_eq!(aff[0].data(), &[0.0, 0.0, 0.0, 1.0, 0.0, 1.0]);
        // y has extent 1, so no y neighbours.
        assert!(aff[1].data().iter().all(|&v| v == 0.0));
        // x affinity: 1->1 connected, 1->2 and 0 are boundaries.
        assert_eq!(aff[2].data(), &[0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_foreground() {
        let label = Chunk::from_vec([1, 1, 3], vec![0, 5, 7]).unwrap();
        let fg = TargetKind::Foreground.compute(&label);
        assert_eq!(fg.len(), TargetKind::Foreground.channels());
        assert_eq!(fg[0].data(), &[0.0, 1.0, 1.0]);
    }
}
