//! Reward shaping for labeled and self-supervised learning

use crate::mitigation::MitigationAction;

/// Reward when the agent flagged an attack without ground truth
pub const SELF_SUPERVISED_ATTACK: f64 = 1.0;
/// Reward when the agent stayed quiet without ground truth
pub const SELF_SUPERVISED_QUIET: f64 = -0.1;

/// Reward for `action` given the true label of the window
///
/// Binary action spaces score plain correctness (+1/-1). Larger spaces follow
/// the mitigation table: under attack Block pays most and Monitor is heavily
/// penalised; on benign traffic only Monitor is rewarded.
pub fn labeled_reward(action: usize, is_attack: bool, action_size: usize) -> f64 {
    if action_size <= 2 {
        let flagged = action != 0;
        return if flagged == is_attack { 1.0 } else { -1.0 };
    }

    match (is_attack, MitigationAction::from_index(action)) {
        (true, Some(MitigationAction::Monitor)) => -10.0,
        (true, Some(MitigationAction::RateLimit)) => 5.0,
        (true, Some(MitigationAction::Block)) => 10.0,
        (true, Some(MitigationAction::Filter)) => 7.0,
        (false, Some(MitigationAction::Monitor)) => 1.0,
        _ => -5.0,
    }
}

/// Reward used for online learning when no label is available
pub fn self_supervised_reward(is_attack: bool) -> f64 {
    if is_attack {
        SELF_SUPERVISED_ATTACK
    } else {
        SELF_SUPERVISED_QUIET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mitigation_rewards() {
        assert_eq!(labeled_reward(0, true, 4), -10.0);
        assert_eq!(labeled_reward(1, true, 4), 5.0);
        assert_eq!(labeled_reward(2, true, 4), 10.0);
        assert_eq!(labeled_reward(3, true, 4), 7.0);
        assert_eq!(labeled_reward(0, false, 4), 1.0);
        assert_eq!(labeled_reward(2, false, 4), -5.0);
    }

    #[test]
    fn test_binary_rewards() {
        assert_eq!(labeled_reward(1, true, 2), 1.0);
        assert_eq!(labeled_reward(0, true, 2), -1.0);
        assert_eq!(labeled_reward(0, false, 2), 1.0);
        assert_eq!(labeled_reward(1, false, 2), -1.0);
    }

    #[test]
    fn test_self_supervised() {
        assert_eq!(self_supervised_reward(true), 1.0);
        assert_eq!(self_supervised_reward(false), -0.1);
    }
}
