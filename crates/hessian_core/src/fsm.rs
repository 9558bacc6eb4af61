//! Finite state machine

use std::fmt::Debug;

/// C-enums that implement this trait can undergo state machine transitions.
///
/// There are no outputs during state transitions, just changes in state.
pub trait TransitableState: Clone + Copy + Debug + Default {
    /// Events that can trigger a change in state.
    type Event: Debug;

    /// Process the input and modify the internal state.
    ///
    /// Returns false, leaving the state untouched, if the event is not
    /// accepted in the current state.
    ///
    /// Use the [state_transitions!] macro to implement this trait.
    fn ingest(&mut self, event: Self::Event) -> bool;

    /// Like [TransitableState::ingest], but an unaccepted event is an error.
    fn advance(&mut self, event: Self::Event) -> Result<(), InvalidTransition<Self>> {
        let before = *self;
        let described = format!("{:?}", event);

        match self.ingest(event) {
            true => Ok(()),
            false => Err(InvalidTransition {
                state: before,
                event: described,
            }),
        }
    }
}

/// An event arrived in a state that does not accept it.
#[derive(Debug, Clone)]
pub struct InvalidTransition<S> {
    pub state: S,
    pub event: String,
}

impl<S: Debug> std::fmt::Display for InvalidTransition<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} is not accepted in state {:?}", self.event, self.state)
    }
}

/// Generate the state transition logic.
///
/// This macro implements [TransitableState::ingest].
///
/// ```
/// use hessian_core::fsm::TransitableState;
/// use hessian_core::state_transitions;
///
/// #[derive(Clone, Copy, Debug, Default)]
/// enum SimpleMachine {
///     #[default]
///     Off,
///     On,
///     Running,
/// }
///
/// #[derive(Debug)]
/// enum SimpleMachineEvents {
///     PowerButtonPress,
///     Start,
///     Stop,
/// }
///
/// state_transitions! {
///     type State = SimpleMachine;
///     type Event = SimpleMachineEvents;
///
///     Off + PowerButtonPress => On;
///     On + PowerButtonPress => Off;
///     On + Start => Running;
///     Running + Stop => On;
///     Running + PowerButtonPress => Off;
/// }
///
/// let mut machine = SimpleMachine::default();
/// assert!(machine.ingest(SimpleMachineEvents::PowerButtonPress));
/// assert!(!machine.ingest(SimpleMachineEvents::Stop));
/// ```
#[macro_export]
macro_rules! state_transitions {
    {
        type State = $st: ident;
        type Event = $ev: ident;

        $($st_variant: ident + $($ev_variant: ident)|+ => $new_st: ident;)*
    } => {

        impl $crate::fsm::TransitableState for $st {
            type Event = $ev;

            #[allow(unreachable_code, unreachable_patterns)]
            fn ingest(&mut self, event: Self::Event) -> bool {

                let next = match (*self, event) {

                    $(
                        ($st::$st_variant, $($ev::$ev_variant)|+) => $st::$new_st,
                    )*

                    // all other cases
                    _ => return false,
                };

                *self = next;
                true
            }
        }
    };
}

#[cfg(test)]
mod macro_tests {

    use super::*;

    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    enum SimpleMachine {
        #[default]
        Off,
        On,
        Running,
    }

    #[derive(Debug)]
    enum SimpleMachineEvents {
        PowerButtonPress,

        Start,

        Stop,
    }

    state_transitions! {
        type State = SimpleMachine;
        type Event = SimpleMachineEvents;

        Off + PowerButtonPress => On;
        On + PowerButtonPress => Off;
        On + Start => Running;
        Running + Stop => On;
        Running + PowerButtonPress => Off;
    }

    #[derive(Clone, Copy, Debug, Default)]
    enum OtherMachine {
        #[default]
        This,
    }

    #[derive(Debug)]
    enum OtherMachineEvents {
        Poke,
    }

    // state machine with 1 state and no transitions
    state_transitions! {
        type State = OtherMachine;
        type Event = OtherMachineEvents;
    }

    #[test]
    fn test_state_transitions() {
        let mut machine = SimpleMachine::default();

        assert!(machine.ingest(SimpleMachineEvents::PowerButtonPress));
        assert_eq!(machine, SimpleMachine::On);

        assert!(machine.ingest(SimpleMachineEvents::Start));
        assert_eq!(machine, SimpleMachine::Running);

        assert!(!machine.ingest(SimpleMachineEvents::Start));
        assert_eq!(machine, SimpleMachine::Running);

        assert!(machine.ingest(SimpleMachineEvents::Stop));
        assert_eq!(machine, SimpleMachine::On);

        machine.ingest(SimpleMachineEvents::Start);
        assert!(machine.ingest(SimpleMachineEvents::PowerButtonPress));
        assert_eq!(machine, SimpleMachine::Off);
    }

    #[test]
    fn test_invalid_transition() {
        let mut machine = SimpleMachine::default();
        let err = machine.advance(SimpleMachineEvents::Stop).unwrap_err();
        assert_eq!(err.state, SimpleMachine::Off);
        assert_eq!(err.to_string(), "Stop is not accepted in state Off");

        let mut other = OtherMachine::default();
        assert!(!other.ingest(OtherMachineEvents::Poke));
    }
}
