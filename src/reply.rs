use crate::decl::{OpName, StateEchoFn};
use crate::error::LogicFault;

/// The raw terminal shape of a clause body, written as if operating on an
/// explicit state value.
///
/// A body either ends in an ordinary expression ([`Reply`](BodyResult::Reply)),
/// or marks a new state value together with a result expression
/// ([`SetAndReply`](BodyResult::SetAndReply)), or marks a new state value and
/// omits the result ([`Set`](BodyResult::Set)) — the set-state-and-return-it
/// shorthand.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyResult<S, R> {
    /// An ordinary terminal expression. Prior state is kept.
    Reply(R),
    /// The set-state-then-reply idiom: commit the new state, reply the value.
    SetAndReply(S, R),
    /// Set the state and reply with the new state itself.
    Set(S),
}

/// The normalized reply produced by every generated implementation function.
///
/// `Plain` leaves the prior state unchanged; `WithState` carries the state the
/// worker must commit before serving the next call. Workers unwrap the value
/// before replying, so callers never observe the state half.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<R, S> {
    /// A plain value. Prior state is unchanged.
    Plain(R),
    /// A value plus the updated state to commit.
    WithState(R, S),
}

impl<R, S> Reply<R, S> {
    /// The reply value, regardless of whether a state update rides along.
    pub fn value(&self) -> &R {
        match self {
            Reply::Plain(value) | Reply::WithState(value, _) => value,
        }
    }

    /// Consume the reply, discarding any state update.
    pub fn into_value(self) -> R {
        match self {
            Reply::Plain(value) | Reply::WithState(value, _) => value,
        }
    }
}

/// Classify a clause body's terminal value into the normalized reply shape.
///
/// This is pure syntactic classification over the body shape: `Reply` maps to
/// [`Reply::Plain`], `SetAndReply` to [`Reply::WithState`]. The `Set`
/// shorthand defaults the reply to the new state itself through the
/// declaration's state-echo conversion; a `Set` result without a declared
/// conversion is a logic fault, since a state value cannot be defaulted into
/// an arbitrary reply type.
pub fn translate<S, R>(
    op: &OpName,
    result: BodyResult<S, R>,
    state_echo: Option<&StateEchoFn<S, R>>,
) -> Result<Reply<R, S>, LogicFault> {
    match result {
        BodyResult::Reply(value) => Ok(Reply::Plain(value)),
        BodyResult::SetAndReply(state, value) => Ok(Reply::WithState(value, state)),
        BodyResult::Set(state) => {
            let echo = state_echo.ok_or_else(|| LogicFault::MissingStateEcho { op: op.clone() })?;
            let value = echo(&state);
            Ok(Reply::WithState(value, state))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::decl::StateEchoFn;

    fn op() -> OpName {
        OpName::from("bump")
    }

    #[test]
    fn test_plain_reply_keeps_state() {
        let reply = translate::<u64, u64>(&op(), BodyResult::Reply(7), None).unwrap();
        assert_eq!(reply, Reply::Plain(7));
    }

    #[test]
    fn test_set_and_reply_normalizes_to_with_state() {
        let reply = translate::<u64, u64>(&op(), BodyResult::SetAndReply(3, 9), None).unwrap();
        assert_eq!(reply, Reply::WithState(9, 3));
    }

    #[test]
    fn test_set_shorthand_echoes_new_state() {
        let echo: StateEchoFn<u64, u64> = Arc::new(|state| *state);
        let reply = translate(&op(), BodyResult::Set(42), Some(&echo)).unwrap();
        assert_eq!(reply, Reply::WithState(42, 42));
    }

    #[test]
    fn test_set_shorthand_without_echo_is_a_fault() {
        let result = translate::<u64, u64>(&op(), BodyResult::Set(42), None);
        assert!(matches!(
            result.unwrap_err(),
            LogicFault::MissingStateEcho { .. }
        ));
    }

    #[test]
    fn test_value_accessors() {
        let reply: Reply<u64, u64> = Reply::WithState(9, 3);
        assert_eq!(*reply.value(), 9);
        assert_eq!(reply.into_value(), 9);
    }
}
