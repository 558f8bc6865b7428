use crate::error::Result;
use crate::matrix::DeviceMatrix;
use crate::mlp::Mlp;

/// How the learning rate evolves over training steps
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LearningRateSchedule {
    Constant,
    /// Multiply by `factor` every `every` steps
    StepDecay { every: usize, factor: f32 },
    /// `base / (1 + rate * step)`
    InverseTime { rate: f32 },
}

impl LearningRateSchedule {
    pub fn rate_at(&self, step: usize, base: f32) -> f32 {
        match *self {
            LearningRateSchedule::Constant => base,
            LearningRateSchedule::StepDecay { every, factor } => {
                if every == 0 {
                    base
                } else {
                    base * factor.powi((step / every) as i32)
                }
            }
            LearningRateSchedule::InverseTime { rate } => base / (1. + rate * step as f32),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct TrainingConfig {
    pub steps: usize,
    pub learning_rate: f32,
    pub schedule: LearningRateSchedule,
    /// Log the loss at info level every this many steps; 0 disables it
    pub log_every: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            steps: 1000,
            learning_rate: 0.5,
            schedule: LearningRateSchedule::Constant,
            log_every: 100,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TrainingReport {
    /// Loss returned by every step, in order
    pub losses: Vec<f32>,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f32> {
        self.losses.last().copied()
    }
}

/// Drives repeated full-batch SGD steps on one input/target pair
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn fit(
        &self,
        mlp: &mut Mlp,
        input: &DeviceMatrix,
        target: &DeviceMatrix,
    ) -> Result<TrainingReport> {
        let mut report = TrainingReport {
            losses: Vec::with_capacity(self.config.steps),
        };
        for step in 0..self.config.steps {
            let rate = self
                .config
                .schedule
                .rate_at(step, self.config.learning_rate);
            mlp.set_learning_rate(rate);
            let loss = mlp.train_step(input, target)?;

            if self.config.log_every > 0 && step % self.config.log_every == 0 {
                log::info!("step {}: loss {:.6} (lr {})", step, loss, rate);
            } else {
                log::trace!("step {}: loss {:.6}", step, loss);
            }
            report.losses.push(loss);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedules() {
        let constant = LearningRateSchedule::Constant;
        assert_eq!(constant.rate_at(500, 0.1), 0.1);

        let step = LearningRateSchedule::StepDecay {
            every: 10,
            factor: 0.5,
        };
        assert_eq!(step.rate_at(9, 1.), 1.);
        assert_eq!(step.rate_at(10, 1.), 0.5);
        assert_eq!(step.rate_at(25, 1.), 0.25);

        let never = LearningRateSchedule::StepDecay {
            every: 0,
            factor: 0.5,
        };
        assert_eq!(never.rate_at(100, 1.), 1.);

        let inverse = LearningRateSchedule::InverseTime { rate: 1. };
        assert_eq!(inverse.rate_at(0, 2.), 2.);
        assert_eq!(inverse.rate_at(3, 2.), 0.5);
    }

    #[test]
    fn default_config_is_constant() {
        let config = TrainingConfig::default();
        assert_eq!(config.schedule, LearningRateSchedule::Constant);
        assert!(config.steps > 0);
    }
}
