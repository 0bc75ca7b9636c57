#[cfg(test)] use mockall::automock;
use rand::Rng;

/// Decides whether an incoming datagram is discarded before it is processed, simulating an
///  unreliable network.
#[cfg_attr(test, automock)]
pub trait LossInjector: Send + Sync + 'static {
    fn should_drop(&self) -> bool;
}

pub struct ProbabilisticLoss {
    probability: f64,
}

impl ProbabilisticLoss {
    pub fn new(probability: f64) -> ProbabilisticLoss {
        ProbabilisticLoss { probability }
    }
}

impl LossInjector for ProbabilisticLoss {
    fn should_drop(&self) -> bool {
        if self.probability <= 0.0 {
            return false;
        }
        rand::rng().random::<f64>() < self.probability
    }
}
