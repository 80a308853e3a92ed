pub mod sgd;
pub mod adam;

use serde::{Serialize, Deserialize};

use crate::error::Result;
use crate::model::Param;

pub use sgd::Sgd;
pub use adam::Adam;

/// Updates parameters from their accumulated gradients.
pub trait Optimizer {
    fn step(&mut self, params: &mut [&mut Param]) -> Result<()>;

    fn learning_rate(&self) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

impl OptimizerKind {
    pub fn build(&self, learning_rate: f64) -> Box<dyn Optimizer> {
        match self {
            OptimizerKind::Adam => Box::new(Adam::new(learning_rate)),
            OptimizerKind::Sgd => Box::new(Sgd::new(learning_rate)),
        }
    }
}
