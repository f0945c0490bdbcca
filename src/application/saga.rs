use crate::error::Result;
use async_trait::async_trait;

/// One step of a multi-step workflow: a forward action paired with the
/// compensation that undoes it.
#[async_trait]
pub trait SagaStep: Send + Sync {
    fn name(&self) -> &str;
    async fn forward(&self) -> Result<()>;
    async fn compensate(&self) -> Result<()>;
}

/// Runs steps in order; on a forward failure, runs the compensations of
/// every completed step in reverse order and returns the original error.
/// Compensation failures are logged, not propagated, so every completed
/// step gets a chance to undo.
pub struct Saga {
    steps: Vec<Box<dyn SagaStep>>,
}

impl Saga {
    pub fn new(steps: Vec<Box<dyn SagaStep>>) -> Self {
        Self { steps }
    }

    pub async fn run(&self) -> Result<()> {
        let mut completed = 0;
        for step in &self.steps {
            match step.forward().await {
                Ok(()) => completed += 1,
                Err(err) => {
                    tracing::warn!(step = step.name(), error = %err, "saga step failed, compensating");
                    for done in self.steps[..completed].iter().rev() {
                        if let Err(comp_err) = done.compensate().await {
                            tracing::error!(
                                step = done.name(),
                                error = %comp_err,
                                "saga compensation failed"
                            );
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MarketError;
    use std::sync::Mutex;
    use std::sync::Arc;

    struct RecordingStep {
        name: String,
        fail: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SagaStep for RecordingStep {
        fn name(&self) -> &str {
            &self.name
        }

        async fn forward(&self) -> Result<()> {
            if self.fail {
                return Err(MarketError::ExternalProviderFailure(format!(
                    "{} blew up",
                    self.name
                )));
            }
            self.log.lock().unwrap().push(format!("fwd:{}", self.name));
            Ok(())
        }

        async fn compensate(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("undo:{}", self.name));
            Ok(())
        }
    }

    fn step(name: &str, fail: bool, log: &Arc<Mutex<Vec<String>>>) -> Box<dyn SagaStep> {
        Box::new(RecordingStep {
            name: name.to_string(),
            fail,
            log: log.clone(),
        })
    }

    #[tokio::test]
    async fn test_all_steps_run_forward() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let saga = Saga::new(vec![step("a", false, &log), step("b", false, &log)]);
        saga.run().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["fwd:a", "fwd:b"]);
    }

    #[tokio::test]
    async fn test_failure_compensates_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let saga = Saga::new(vec![
            step("a", false, &log),
            step("b", false, &log),
            step("c", true, &log),
        ]);
        assert!(matches!(
            saga.run().await,
            Err(MarketError::ExternalProviderFailure(_))
        ));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["fwd:a", "fwd:b", "undo:b", "undo:a"]
        );
    }

    #[tokio::test]
    async fn test_first_step_failure_compensates_nothing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let saga = Saga::new(vec![step("a", true, &log), step("b", false, &log)]);
        assert!(saga.run().await.is_err());
        assert!(log.lock().unwrap().is_empty());
    }
}
