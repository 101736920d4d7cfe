use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct WorkflowDeadline {
    started: Instant,
    budget: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeadlineExpired {
    pub stage: &'static str,
    pub elapsed_ms: f64,
    pub budget_ms: u128,
}

impl WorkflowDeadline {
    pub fn new(budget: Option<Duration>) -> Option<Self> {
        let budget = budget.filter(|budget| !budget.is_zero())?;
        Some(Self {
            started: Instant::now(),
            budget,
        })
    }

    pub fn enforce(self, stage: &'static str) -> Result<(), DeadlineExpired> {
        let elapsed = self.started.elapsed();
        if elapsed <= self.budget {
            return Ok(());
        }
        Err(DeadlineExpired {
            stage,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            budget_ms: self.budget.as_millis(),
        })
    }
}

pub fn enforce_deadline(
    deadline: Option<WorkflowDeadline>,
    stage: &'static str,
) -> Result<(), DeadlineExpired> {
    match deadline {
        Some(deadline) => deadline.enforce(stage),
        None => Ok(()),
    }
}
