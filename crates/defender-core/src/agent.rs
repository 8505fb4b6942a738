//! Double DQN agent
//!
//! Epsilon-greedy action selection over a policy approximator, experience
//! replay, Double-Q targets evaluated by a separate target approximator,
//! multiplicative epsilon decay and hard target syncs every
//! `target_update_interval` training steps.

use crate::approximator::{argmax, Backend, BackendKind, HeuristicApproximator, TrainedApproximator, ValueApproximator};
use crate::config::AgentConfig;
use crate::replay::{BufferStats, ReplayBuffer, Transition};
use crate::{DefenderError, DefenderResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

/// Agent training statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AgentStats {
    pub training_steps: u64,
    pub target_syncs: u64,
    pub rejected_transitions: u64,
    pub last_loss: f64,
}

/// DDQN agent over any pair of value approximators
pub struct DdqnAgent<A: ValueApproximator = Backend> {
    config: AgentConfig,
    policy: A,
    target: A,
    replay: ReplayBuffer,
    epsilon: f64,
    rng: StdRng,
    stats: AgentStats,
}

impl DdqnAgent<Backend> {
    /// Agent backed by a freshly initialised network
    pub fn new(config: AgentConfig) -> DefenderResult<Self> {
        config.validate()?;
        let policy = match config.seed {
            Some(seed) => TrainedApproximator::with_seed(
                config.input_size(),
                config.action_size,
                config.learning_rate,
                seed.wrapping_add(2),
            ),
            None => TrainedApproximator::new(config.input_size(), config.action_size, config.learning_rate),
        };
        let policy = Backend::from(policy);
        let target = policy.clone();
        Self::with_approximators(config, policy, target)
    }

    /// Agent backed by the threshold heuristic
    pub fn heuristic(config: AgentConfig) -> DefenderResult<Self> {
        config.validate()?;
        let policy = Backend::from(HeuristicApproximator::new(config.window_size, config.action_size));
        let target = policy.clone();
        Self::with_approximators(config, policy, target)
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.policy.kind()
    }
}

impl<A: ValueApproximator> DdqnAgent<A> {
    /// Assemble an agent from explicit policy and target approximators
    ///
    /// The target is used as given; call [`sync_target`](Self::sync_target)
    /// to start from identical parameters.
    pub fn with_approximators(config: AgentConfig, policy: A, target: A) -> DefenderResult<Self> {
        config.validate()?;
        for (role, approximator) in [("policy", &policy), ("target", &target)] {
            if approximator.input_size() != config.input_size()
                || approximator.action_size() != config.action_size
            {
                return Err(DefenderError::Config(format!(
                    "{} approximator is {}x{}, agent expects {}x{}",
                    role,
                    approximator.input_size(),
                    approximator.action_size(),
                    config.input_size(),
                    config.action_size
                )));
            }
        }

        let (rng, replay) = match config.seed {
            Some(seed) => (
                StdRng::seed_from_u64(seed),
                ReplayBuffer::with_seed(config.replay_capacity, seed.wrapping_add(1)),
            ),
            None => (StdRng::from_entropy(), ReplayBuffer::new(config.replay_capacity)),
        };

        Ok(Self {
            epsilon: config.epsilon,
            config,
            policy,
            target,
            replay,
            rng,
            stats: AgentStats::default(),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Override the exploration rate, e.g. 0 for pure exploitation
    pub fn set_epsilon(&mut self, epsilon: f64) {
        self.epsilon = if epsilon.is_finite() { epsilon.clamp(0.0, 1.0) } else { self.config.epsilon };
    }

    pub fn stats(&self) -> AgentStats {
        self.stats
    }

    pub fn replay_len(&self) -> usize {
        self.replay.len()
    }

    pub fn replay_stats(&self) -> BufferStats {
        self.replay.stats()
    }

    pub fn policy(&self) -> &A {
        &self.policy
    }

    pub fn target(&self) -> &A {
        &self.target
    }

    /// Apply the configured per-feature weights to every window chunk
    ///
    /// Estimators that score raw features, such as the heuristic, see the
    /// input unchanged.
    fn weighted(&self, input: &[f64]) -> DefenderResult<Vec<f64>> {
        if input.len() != self.config.input_size() {
            return Err(DefenderError::Input(format!(
                "agent expects {} inputs, got {}",
                self.config.input_size(),
                input.len()
            )));
        }
        let weights = match &self.config.feature_weights {
            Some(weights) if !self.policy.scores_raw_features() => weights,
            _ => return Ok(input.to_vec()),
        };
        Ok(input
            .iter()
            .enumerate()
            .map(|(i, v)| v * weights[i % self.config.state_size])
            .collect())
    }

    /// Epsilon-greedy action; never touches epsilon
    pub fn act(&mut self, state: &[f64]) -> DefenderResult<usize> {
        let input = self.weighted(state)?;
        if self.rng.gen::<f64>() < self.epsilon {
            return Ok(self.rng.gen_range(0..self.config.action_size));
        }
        Ok(argmax(&self.policy.predict(&input)?))
    }

    /// Greedy action and the policy's values for every action
    pub fn predict(&self, state: &[f64]) -> DefenderResult<(usize, Vec<f64>)> {
        let q_values = self.policy.predict(&self.weighted(state)?)?;
        Ok((argmax(&q_values), q_values))
    }

    /// Store a transition; non-finite or mis-sized input is rejected and counted
    pub fn remember(
        &mut self,
        state: &[f64],
        action: usize,
        reward: f64,
        next_state: &[f64],
        terminal: bool,
    ) -> DefenderResult<()> {
        let transition = self.build_transition(state, action, reward, next_state, terminal);
        match transition {
            Ok(transition) => {
                self.replay.push(transition);
                Ok(())
            }
            Err(e) => {
                self.stats.rejected_transitions += 1;
                debug!("Rejected transition: {}", e);
                Err(e)
            }
        }
    }

    fn build_transition(
        &self,
        state: &[f64],
        action: usize,
        reward: f64,
        next_state: &[f64],
        terminal: bool,
    ) -> DefenderResult<Transition> {
        if action >= self.config.action_size {
            return Err(DefenderError::Input(format!(
                "action {} outside action space of {}",
                action, self.config.action_size
            )));
        }
        Transition::new(
            self.weighted(state)?,
            action,
            reward,
            self.weighted(next_state)?,
            terminal,
        )
    }

    /// Double-Q learning target
    ///
    /// The policy picks `a*` on `next_state`, the target approximator values
    /// it: `reward + gamma * target(next_state)[a*]`.
    pub fn double_q_target(&self, reward: f64, next_state: &[f64], terminal: bool) -> DefenderResult<f64> {
        if terminal {
            return Ok(reward);
        }
        let best_action = argmax(&self.policy.predict(next_state)?);
        let next_values = self.target.predict(next_state)?;
        let value = next_values.get(best_action).copied().ok_or_else(|| {
            DefenderError::Numeric(format!("target produced {} values", next_values.len()))
        })?;
        Ok(reward + self.config.gamma * value)
    }

    /// One minibatch update; a no-op returning 0 while the buffer is short
    pub fn train_step(&mut self, batch_size: usize) -> DefenderResult<f64> {
        if batch_size == 0 || self.replay.len() < batch_size {
            return Ok(0.0);
        }
        let batch = self.replay.sample(batch_size)?;

        let mut inputs = Vec::with_capacity(batch.len());
        let mut targets = Vec::with_capacity(batch.len());
        for transition in &batch {
            let mut values = self.policy.predict(transition.state())?;
            let target = self.double_q_target(transition.reward(), transition.next_state(), transition.is_terminal())?;
            if !target.is_finite() {
                return Err(DefenderError::Numeric(format!("training target is {}", target)));
            }
            values[transition.action()] = target;
            inputs.push(transition.state().to_vec());
            targets.push(values);
        }

        let loss = self.policy.fit(&inputs, &targets)?;

        if self.epsilon > self.config.epsilon_min {
            self.epsilon = (self.epsilon * self.config.epsilon_decay).max(self.config.epsilon_min);
        }

        self.stats.training_steps += 1;
        self.stats.last_loss = loss;
        if self.stats.training_steps % self.config.target_update_interval == 0 {
            self.sync_target()?;
        }
        Ok(loss)
    }

    /// Hard copy of the policy parameters into the target
    pub fn sync_target(&mut self) -> DefenderResult<()> {
        self.target.load_parameters(&self.policy.parameters())?;
        self.stats.target_syncs += 1;
        debug!("Target network synced after {} steps", self.stats.training_steps);
        Ok(())
    }

    /// Replace policy and target parameters, e.g. from a persisted blob
    pub fn load_parameters(&mut self, params: &[f64]) -> DefenderResult<()> {
        self.policy.load_parameters(params)?;
        self.target.load_parameters(params)?;
        info!("Loaded {} agent parameters", params.len());
        Ok(())
    }

    pub fn parameters(&self) -> Vec<f64> {
        self.policy.parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Returns fixed values and records every fit batch
    struct StubApproximator {
        values: Vec<f64>,
        fitted: Arc<Mutex<Vec<Vec<f64>>>>,
    }

    impl StubApproximator {
        fn new(values: Vec<f64>) -> Self {
            Self {
                values,
                fitted: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl ValueApproximator for StubApproximator {
        fn input_size(&self) -> usize {
            8
        }

        fn action_size(&self) -> usize {
            self.values.len()
        }

        fn predict(&self, _input: &[f64]) -> DefenderResult<Vec<f64>> {
            Ok(self.values.clone())
        }

        fn fit(&mut self, _inputs: &[Vec<f64>], targets: &[Vec<f64>]) -> DefenderResult<f64> {
            self.fitted.lock().extend(targets.iter().cloned());
            Ok(0.5)
        }

        fn parameters(&self) -> Vec<f64> {
            self.values.clone()
        }

        fn load_parameters(&mut self, params: &[f64]) -> DefenderResult<()> {
            self.values = params.to_vec();
            Ok(())
        }
    }

    fn config() -> AgentConfig {
        AgentConfig {
            seed: Some(11),
            ..Default::default()
        }
    }

    #[test]
    fn test_double_q_target_uses_policy_argmax() {
        let policy = StubApproximator::new(vec![0.0, 10.0, 1.0, 2.0]);
        let target = StubApproximator::new(vec![100.0, 2.0, 50.0, 75.0]);
        let agent = DdqnAgent::with_approximators(config(), policy, target).unwrap();

        let next = vec![0.5; 8];
        let value = agent.double_q_target(1.0, &next, false).unwrap();
        // policy argmax is 1, so the target's value for action 1 is used, not max(target) = 100
        assert!((value - (1.0 + 0.95 * 2.0)).abs() < 1e-12);
        assert_eq!(agent.double_q_target(1.0, &next, true).unwrap(), 1.0);
    }

    #[test]
    fn test_train_step_fits_double_q_target() {
        let policy = StubApproximator::new(vec![0.0, 10.0, 1.0, 2.0]);
        let fitted = policy.fitted.clone();
        let target = StubApproximator::new(vec![100.0, 2.0, 50.0, 75.0]);
        let mut agent = DdqnAgent::with_approximators(config(), policy, target).unwrap();

        agent.remember(&[0.1; 8], 3, -1.0, &[0.2; 8], false).unwrap();
        let loss = agent.train_step(1).unwrap();
        assert_eq!(loss, 0.5);

        let fitted = fitted.lock();
        assert_eq!(fitted.len(), 1);
        // only the taken action's entry is replaced
        assert_eq!(fitted[0][0], 0.0);
        assert_eq!(fitted[0][1], 10.0);
        assert_eq!(fitted[0][2], 1.0);
        assert!((fitted[0][3] - (-1.0 + 0.95 * 2.0)).abs() < 1e-12);
    }

    #[test]
    fn test_train_step_noop_when_buffer_short() {
        let mut agent = DdqnAgent::new(config()).unwrap();
        agent.remember(&[0.0; 8], 0, 1.0, &[0.0; 8], false).unwrap();
        assert_eq!(agent.train_step(32).unwrap(), 0.0);
        assert_eq!(agent.epsilon(), 1.0);
        assert_eq!(agent.stats().training_steps, 0);
    }

    #[test]
    fn test_epsilon_schedule() {
        let cfg = AgentConfig {
            epsilon: 1.0,
            epsilon_min: 0.05,
            epsilon_decay: 0.9,
            ..config()
        };
        let policy = StubApproximator::new(vec![0.0; 4]);
        let target = StubApproximator::new(vec![0.0; 4]);
        let mut agent = DdqnAgent::with_approximators(cfg, policy, target).unwrap();
        agent.remember(&[0.0; 8], 0, 0.0, &[0.0; 8], true).unwrap();

        for n in 1..=60 {
            agent.train_step(1).unwrap();
            let expected = f64::max(0.05, 0.9f64.powi(n));
            assert!((agent.epsilon() - expected).abs() < 1e-9, "step {}", n);
        }
    }

    #[test]
    fn test_act_does_not_decay_epsilon() {
        let mut agent = DdqnAgent::new(config()).unwrap();
        for _ in 0..50 {
            let action = agent.act(&[0.3; 8]).unwrap();
            assert!(action < 4);
        }
        assert_eq!(agent.epsilon(), 1.0);
    }

    #[test]
    fn test_hard_sync_interval() {
        let cfg = AgentConfig {
            target_update_interval: 3,
            ..config()
        };
        let policy = StubApproximator::new(vec![1.0, 2.0, 3.0, 4.0]);
        let target = StubApproximator::new(vec![0.0; 4]);
        let mut agent = DdqnAgent::with_approximators(cfg, policy, target).unwrap();
        agent.remember(&[0.0; 8], 0, 0.0, &[0.0; 8], true).unwrap();

        agent.train_step(1).unwrap();
        agent.train_step(1).unwrap();
        assert_eq!(agent.target().parameters(), vec![0.0; 4]);
        agent.train_step(1).unwrap();
        assert_eq!(agent.target().parameters(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(agent.stats().target_syncs, 1);
    }

    #[test]
    fn test_remember_rejects_non_finite() {
        let mut agent = DdqnAgent::new(config()).unwrap();
        assert!(agent.remember(&[0.0; 8], 0, f64::NAN, &[0.0; 8], false).is_err());
        assert!(agent.remember(&[0.0; 8], 9, 1.0, &[0.0; 8], false).is_err());
        assert_eq!(agent.replay_len(), 0);
        assert_eq!(agent.stats().rejected_transitions, 2);
    }

    #[test]
    fn test_feature_weights_applied_before_storage() {
        let cfg = AgentConfig {
            feature_weights: Some(vec![0.5; 8]),
            ..config()
        };
        let mut agent = DdqnAgent::new(cfg).unwrap();
        agent.remember(&[1.0; 8], 0, 1.0, &[0.8; 8], false).unwrap();
        let stored: Vec<f64> = agent.replay.iter().next().unwrap().state().to_vec();
        assert_eq!(stored, vec![0.5; 8]);
    }

    #[test]
    fn test_heuristic_ignores_feature_weights() {
        let syn_flood = [0.99, 0.0, 0.95, 0.54, 0.6, 0.8, 0.02, 0.0];
        let weighted = DdqnAgent::heuristic(AgentConfig {
            feature_weights: Some(crate::config::ONE_R_WEIGHTS.to_vec()),
            ..config()
        })
        .unwrap();
        let plain = DdqnAgent::heuristic(config()).unwrap();

        let (action, q_values) = weighted.predict(&syn_flood).unwrap();
        assert_eq!(action, 1);
        assert_eq!(q_values, plain.predict(&syn_flood).unwrap().1);
    }

    #[test]
    fn test_network_agent_learns_to_act() {
        let mut agent = DdqnAgent::new(AgentConfig {
            action_size: 2,
            ..config()
        })
        .unwrap();
        let attack = [0.9, 0.1, 0.9, 0.7, 0.8, 0.8, 0.05, 0.1];
        let benign = [0.4, 0.5, 0.05, 0.3, 0.1, 0.1, 0.4, 0.4];
        for _ in 0..40 {
            agent.remember(&attack, 1, 1.0, &attack, true).unwrap();
            agent.remember(&attack, 0, -1.0, &attack, true).unwrap();
            agent.remember(&benign, 0, 1.0, &benign, true).unwrap();
            agent.remember(&benign, 1, -1.0, &benign, true).unwrap();
        }
        for _ in 0..300 {
            agent.train_step(32).unwrap();
        }
        agent.set_epsilon(0.0);
        assert_eq!(agent.act(&attack).unwrap(), 1);
        assert_eq!(agent.act(&benign).unwrap(), 0);
    }
}
