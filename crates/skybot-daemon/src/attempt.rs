//! Connection attempt state machine.
//!
//! A pure transition function over `(AttemptState, ConnectionEvent)`. It
//! decides the new connection status and counters and returns the effects
//! the orchestrator must carry out: log lines, a delayed reconnect, or
//! giving the slot up. Nothing here touches the network or the clock.
//!
//! Retry budget is two-tier: `attempt` counts a burst of quick retries and
//! wraps to zero every `cycle` disconnects, while `total_failures` keeps
//! growing until `give_up_threshold` releases the slot.

use std::time::Duration;

use skybot_types::{ConnectionStatus, RetryPolicy};

/// Lifecycle events reported by a game connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Authenticated with the remote server.
    Login,
    /// Entered the game world.
    Spawn,
    /// Removed by the server. An `End` follows.
    Kicked(String),
    /// Transport or protocol error. An `End` usually follows.
    Error(String),
    /// A line of output received from the server.
    Message(String),
    /// The connection is gone, whatever the cause.
    End,
}

/// Per-slot retry counters. Kept in memory only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptCounters {
    pub attempt: u32,
    pub total_failures: u32,
}

/// Connection status plus counters: the state the machine transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptState {
    pub status: ConnectionStatus,
    pub counters: AttemptCounters,
}

/// Work the orchestrator must perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Append a line to the slot log.
    Log(String),
    /// Reconnect to the same endpoint after `delay`.
    ScheduleReconnect { delay: Duration },
    /// Release the slot and persist.
    GiveUp { failures: u32 },
}

impl AttemptState {
    /// State of a slot whose connection has just been opened.
    pub fn connecting(counters: AttemptCounters) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            counters,
        }
    }

    /// Apply `event` under `policy`.
    pub fn on_event(self, event: &ConnectionEvent, policy: &RetryPolicy) -> (Self, Vec<Effect>) {
        match event {
            ConnectionEvent::Login => {
                let next = Self {
                    status: ConnectionStatus::Online,
                    counters: AttemptCounters {
                        attempt: 0,
                        ..self.counters
                    },
                };
                (next, vec![Effect::Log("logged in".into())])
            }
            ConnectionEvent::Spawn => (self, vec![Effect::Log("spawned".into())]),
            ConnectionEvent::Kicked(reason) => {
                (self, vec![Effect::Log(format!("kicked: {reason}"))])
            }
            ConnectionEvent::Error(message) => {
                (self, vec![Effect::Log(format!("error: {message}"))])
            }
            ConnectionEvent::Message(text) => {
                (self, vec![Effect::Log(format!("server: {text}"))])
            }
            ConnectionEvent::End => self.on_end(policy),
        }
    }

    fn on_end(self, policy: &RetryPolicy) -> (Self, Vec<Effect>) {
        let AttemptCounters {
            attempt,
            total_failures,
        } = self.counters;

        if total_failures + 1 >= policy.give_up_threshold {
            let failures = total_failures + 1;
            let next = Self {
                status: ConnectionStatus::Offline,
                counters: AttemptCounters {
                    attempt,
                    total_failures: failures,
                },
            };
            return (
                next,
                vec![
                    Effect::Log(format!("disconnected; giving up after {failures} failures")),
                    Effect::GiveUp { failures },
                ],
            );
        }

        let counters = if attempt + 1 >= policy.cycle {
            AttemptCounters {
                attempt: 0,
                total_failures: total_failures + 1,
            }
        } else {
            AttemptCounters {
                attempt: attempt + 1,
                total_failures: total_failures + 1,
            }
        };
        let delay = policy.delay();
        let next = Self {
            status: ConnectionStatus::Offline,
            counters,
        };
        (
            next,
            vec![
                Effect::Log(format!(
                    "disconnected; rejoining in {}ms (attempt {}, failures {}/{})",
                    delay.as_millis(),
                    counters.attempt,
                    counters.total_failures,
                    policy.give_up_threshold
                )),
                Effect::ScheduleReconnect { delay },
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            delay_ms: 1000,
            cycle: 5,
            give_up_threshold: 10,
        }
    }

    fn end(state: AttemptState) -> (AttemptState, Vec<Effect>) {
        state.on_event(&ConnectionEvent::End, &policy())
    }

    fn has_reconnect(effects: &[Effect]) -> bool {
        effects
            .iter()
            .any(|e| matches!(e, Effect::ScheduleReconnect { .. }))
    }

    #[test]
    fn login_goes_online_and_clears_attempt() {
        let state = AttemptState::connecting(AttemptCounters {
            attempt: 3,
            total_failures: 7,
        });
        let (next, effects) = state.on_event(&ConnectionEvent::Login, &policy());
        assert_eq!(next.status, ConnectionStatus::Online);
        assert_eq!(next.counters.attempt, 0);
        assert_eq!(next.counters.total_failures, 7);
        assert_eq!(effects, vec![Effect::Log("logged in".into())]);
    }

    #[test]
    fn informational_events_keep_state() {
        let state = AttemptState::connecting(AttemptCounters::default());
        for event in [
            ConnectionEvent::Spawn,
            ConnectionEvent::Kicked("banned".into()),
            ConnectionEvent::Error("ECONNRESET".into()),
            ConnectionEvent::Message("<Steve> hi".into()),
        ] {
            let (next, effects) = state.on_event(&event, &policy());
            assert_eq!(next, state);
            assert_eq!(effects.len(), 1);
            assert!(matches!(effects[0], Effect::Log(_)));
        }
    }

    #[test]
    fn end_goes_offline_and_schedules_reconnect_with_delay() {
        let (next, effects) = end(AttemptState::connecting(AttemptCounters::default()));
        assert_eq!(next.status, ConnectionStatus::Offline);
        assert!(effects.contains(&Effect::ScheduleReconnect {
            delay: Duration::from_secs(1)
        }));
    }

    #[test]
    fn attempt_increments_within_cycle_then_wraps() {
        let mut state = AttemptState::connecting(AttemptCounters::default());
        for i in 1..policy().cycle {
            let (next, effects) = end(state);
            assert_eq!(next.counters.attempt, i);
            assert_eq!(next.counters.total_failures, i);
            assert!(has_reconnect(&effects));
            state = next;
        }

        let (next, effects) = end(state);
        assert_eq!(next.counters.attempt, 0, "cycle end wraps attempt");
        assert_eq!(next.counters.total_failures, policy().cycle);
        assert!(has_reconnect(&effects));

        let (next, _) = end(next);
        assert_eq!(next.counters.attempt, 1);
        assert_eq!(next.counters.total_failures, policy().cycle + 1);
    }

    #[test]
    fn gives_up_exactly_at_threshold() {
        let mut state = AttemptState::connecting(AttemptCounters::default());
        for _ in 1..policy().give_up_threshold {
            let (next, effects) = end(state);
            assert!(!effects.iter().any(|e| matches!(e, Effect::GiveUp { .. })));
            state = next;
        }
        assert_eq!(state.counters.total_failures, policy().give_up_threshold - 1);

        let (next, effects) = end(state);
        assert_eq!(next.status, ConnectionStatus::Offline);
        assert_eq!(next.counters.total_failures, policy().give_up_threshold);
        assert!(effects.contains(&Effect::GiveUp { failures: 10 }));
        assert!(!has_reconnect(&effects));
    }

    #[test]
    fn login_between_failures_keeps_failure_budget() {
        let (state, _) = end(AttemptState::connecting(AttemptCounters::default()));
        let (state, _) = end(state);
        let (state, _) = state.on_event(&ConnectionEvent::Login, &policy());
        assert_eq!(state.counters.attempt, 0);
        assert_eq!(state.counters.total_failures, 2);
        let (state, _) = end(state);
        assert_eq!(state.counters.attempt, 1);
        assert_eq!(state.counters.total_failures, 3);
    }

    #[test]
    fn threshold_of_one_gives_up_on_first_end() {
        let policy = RetryPolicy {
            delay_ms: 0,
            cycle: 1,
            give_up_threshold: 1,
        };
        let (_, effects) = AttemptState::connecting(AttemptCounters::default())
            .on_event(&ConnectionEvent::End, &policy);
        assert!(effects.contains(&Effect::GiveUp { failures: 1 }));
    }

    #[test]
    fn cycle_of_one_never_accumulates_attempt() {
        let policy = RetryPolicy {
            delay_ms: 10,
            cycle: 1,
            give_up_threshold: 100,
        };
        let mut state = AttemptState::connecting(AttemptCounters::default());
        for _ in 0..5 {
            let (next, _) = state.on_event(&ConnectionEvent::End, &policy);
            assert_eq!(next.counters.attempt, 0);
            state = next;
        }
        assert_eq!(state.counters.total_failures, 5);
    }
}
