//! Call and reply framing on top of the value readers and writers.
//!
//! A message starts with a short header naming its protocol version. The server
//! reads it with [HeaderType::detect], decodes the call from the remaining bytes
//! and answers in the version the header asks for.

use std::sync::Arc;

use crate::fsm::TransitableState;
use crate::registry::TypeRegistry;
use crate::ser_de::consts::{BC_FAULT, BC_REPLY, BC_VERSION, H1_CALL, H1_REPLY};
use crate::ser_de::{
    Error, Fault, Hessian1Input, Hessian1Output, Hessian2Input, Hessian2Output, HessianInput,
    HessianOutput, SerDeResult,
};
use crate::state_transitions;
use crate::value::Value;

/// Message kind announced by the first bytes of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderType {
    /// `c 1 x`: Hessian 1 call expecting a Hessian 1 reply
    Call1Reply1,
    /// `c 2 x`: Hessian 1 call expecting a Hessian 2 reply
    Call1Reply2,
    /// `H 2 0 C`: Hessian 2 call
    Hessian2,
    /// `r 1 0`
    Reply1,
    /// `H 2 0 R` or `H 2 0 F`
    Reply2,
}

impl HeaderType {
    /// Classify a frame. Returns the header and the number of bytes it occupies.
    pub fn detect(frame: &[u8]) -> SerDeResult<(Self, usize)> {
        let Some(&code) = frame.first() else {
            return Err(Error::protocol("unexpected end of file for Hessian message"));
        };
        if frame.len() < 3 {
            return Err(Error::protocol("unexpected end of file for Hessian message"));
        }
        let major = frame[1];

        let header = match code {
            H1_CALL if major >= 2 => Self::Call1Reply2,
            H1_CALL => Self::Call1Reply1,
            H1_REPLY => Self::Reply1,
            BC_VERSION => match frame.get(3) {
                Some(&BC_REPLY) | Some(&BC_FAULT) => Self::Reply2,
                _ => Self::Hessian2,
            },
            _ => {
                return Err(Error::protocol(format!(
                    "{} 0x{:02x} is an unknown Hessian message code.",
                    code as char, code
                )))
            }
        };

        Ok((header, 3))
    }

    pub fn is_call1(self) -> bool {
        matches!(self, Self::Call1Reply1 | Self::Call1Reply2)
    }

    pub fn is_call2(self) -> bool {
        matches!(self, Self::Hessian2)
    }

    pub fn is_reply1(self) -> bool {
        matches!(self, Self::Call1Reply1 | Self::Reply1)
    }

    pub fn is_reply2(self) -> bool {
        matches!(self, Self::Call1Reply2 | Self::Hessian2 | Self::Reply2)
    }

    /// Version of the body following the header.
    pub fn body_version(self) -> Version {
        match self {
            Self::Call1Reply1 | Self::Call1Reply2 | Self::Reply1 => Version::Hessian1,
            Self::Hessian2 | Self::Reply2 => Version::Hessian2,
        }
    }

    /// Version the answer to this message must use.
    pub fn reply_version(self) -> Version {
        match self.is_reply1() {
            true => Version::Hessian1,
            false => Version::Hessian2,
        }
    }
}

/// Protocol version of a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Version {
    Hessian1,
    #[default]
    Hessian2,
}

impl Version {
    /// A reader over `bytes` for this version.
    pub fn input<'a>(self, bytes: &'a [u8], registry: Arc<TypeRegistry>) -> Box<dyn HessianInput + 'a> {
        match self {
            Self::Hessian1 => Box::new(Hessian1Input::with_registry(bytes, registry)),
            Self::Hessian2 => Box::new(Hessian2Input::with_registry(bytes, registry)),
        }
    }

    /// A writer appending to `bytes` for this version.
    pub fn output<'a>(
        self,
        bytes: &'a mut Vec<u8>,
        registry: Arc<TypeRegistry>,
    ) -> Box<dyn HessianOutput + 'a> {
        match self {
            Self::Hessian1 => Box::new(Hessian1Output::with_registry(bytes, registry)),
            Self::Hessian2 => Box::new(Hessian2Output::with_registry(bytes, registry)),
        }
    }
}

/// A decoded method call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: String,
    pub args: Vec<Value>,
}

impl Call {
    pub fn new<S: Into<String>>(method: S, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }
}

/// Outcome of a call as carried by a reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Value(Value),
    Fault(Fault),
}

impl Reply {
    pub fn into_result(self) -> SerDeResult<Value> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Fault(fault) => Err(Error::RemoteFault(fault)),
        }
    }
}

/// Progress through an incoming call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    #[default]
    AwaitingCallTag,
    AwaitingMethodName,
    AwaitingArgCount,
    ReadingArguments,
    Complete,
}

#[derive(Debug)]
pub enum CallEvent {
    CallTag,
    MethodName,
    ArgCount,
    ArgumentsDone,
}

state_transitions! {
    type State = CallState;
    type Event = CallEvent;

    AwaitingCallTag + CallTag => AwaitingMethodName;
    AwaitingMethodName + MethodName => AwaitingArgCount;
    AwaitingArgCount + ArgCount => ReadingArguments;
    ReadingArguments + ArgumentsDone => Complete;
}

/// Progress through an outgoing or incoming reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyState {
    #[default]
    AwaitingReplyTag,
    Value,
    Fault,
    Complete,
}

#[derive(Debug)]
pub enum ReplyEvent {
    ValueTag,
    FaultTag,
    BodyDone,
}

state_transitions! {
    type State = ReplyState;
    type Event = ReplyEvent;

    AwaitingReplyTag + ValueTag => Value;
    AwaitingReplyTag + FaultTag => Fault;
    Value + BodyDone => Complete;
    Fault + BodyDone => Complete;
}

fn step<S: TransitableState>(state: &mut S, event: S::Event) -> SerDeResult<()> {
    state
        .advance(event)
        .map_err(|e| Error::protocol(format!("envelope out of order: {}", e)))
}

/// Read a call body, after its header has been consumed.
///
/// Hessian 1 calls carry no argument count; their arguments run up to the end marker.
pub fn read_call(input: &mut dyn HessianInput) -> SerDeResult<Call> {
    let mut state = CallState::default();

    input.read_call()?;
    step(&mut state, CallEvent::CallTag)?;

    let method = input.read_method()?;
    step(&mut state, CallEvent::MethodName)?;

    let arg_count = input.read_method_arg_length()?;
    step(&mut state, CallEvent::ArgCount)?;
    log::trace!("call {} with {:?} arguments", method, arg_count);

    let mut args = vec![];
    match arg_count {
        Some(count) => {
            for _ in 0..count {
                args.push(input.read_object()?);
            }
        }
        None => {
            while !input.is_end()? {
                args.push(input.read_object()?);
            }
        }
    }
    input.complete_call()?;
    step(&mut state, CallEvent::ArgumentsDone)?;

    Ok(Call { method, args })
}

/// Read a reply, turning a fault frame into [Reply::Fault].
pub fn read_reply(input: &mut dyn HessianInput) -> SerDeResult<Reply> {
    let mut state = ReplyState::default();

    let reply = match input.read_reply() {
        Ok(value) => {
            step(&mut state, ReplyEvent::ValueTag)?;
            Reply::Value(value)
        }
        Err(Error::RemoteFault(fault)) => {
            step(&mut state, ReplyEvent::FaultTag)?;
            Reply::Fault(fault)
        }
        Err(e) => return Err(e),
    };
    step(&mut state, ReplyEvent::BodyDone)?;

    Ok(reply)
}

pub fn write_call(out: &mut dyn HessianOutput, call: &Call) -> SerDeResult<()> {
    out.start_call(&call.method, call.args.len())?;
    for arg in &call.args {
        out.write_object(arg)?;
    }
    out.complete_call()?;
    out.flush()
}

pub fn write_reply(out: &mut dyn HessianOutput, reply: &Reply) -> SerDeResult<()> {
    let mut state = ReplyState::default();

    match reply {
        Reply::Value(value) => {
            step(&mut state, ReplyEvent::ValueTag)?;
            out.start_reply()?;
            out.write_object(value)?;
            out.complete_reply()?;
        }
        Reply::Fault(fault) => {
            step(&mut state, ReplyEvent::FaultTag)?;
            out.write_fault(&fault.code, &fault.message, fault.detail.as_ref())?;
        }
    }
    step(&mut state, ReplyEvent::BodyDone)?;

    out.flush()
}

/// Encode a complete call frame.
pub fn encode_call(version: Version, call: &Call, registry: Arc<TypeRegistry>) -> SerDeResult<Vec<u8>> {
    let mut bytes = vec![];
    {
        let mut out = version.output(&mut bytes, registry);
        write_call(out.as_mut(), call)?;
    }
    Ok(bytes)
}

/// Decode a complete call frame, header included.
pub fn decode_call(frame: &[u8], registry: Arc<TypeRegistry>) -> SerDeResult<(HeaderType, Call)> {
    let (header, consumed) = HeaderType::detect(frame)?;
    if !(header.is_call1() || header.is_call2()) {
        return Err(Error::protocol(format!("{:?} is an unknown Hessian call", header)));
    }

    let mut input = header.body_version().input(&frame[consumed..], registry);
    let call = read_call(input.as_mut())?;
    Ok((header, call))
}

/// Encode a complete reply frame.
pub fn encode_reply(version: Version, reply: &Reply, registry: Arc<TypeRegistry>) -> SerDeResult<Vec<u8>> {
    let mut bytes = vec![];
    {
        let mut out = version.output(&mut bytes, registry);
        write_reply(out.as_mut(), reply)?;
    }
    Ok(bytes)
}

/// Decode a complete reply frame.
pub fn decode_reply(version: Version, frame: &[u8], registry: Arc<TypeRegistry>) -> SerDeResult<Reply> {
    let mut input = version.input(frame, registry);
    read_reply(input.as_mut())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ser_de::{FAULT_SERVICE_EXCEPTION, FaultKind};
    use crate::value::RemoteException;

    fn registry() -> Arc<TypeRegistry> {
        Arc::new(TypeRegistry::new())
    }

    #[test]
    fn test_detect_header() {
        assert_eq!(HeaderType::detect(b"c\x01\x00m").unwrap(), (HeaderType::Call1Reply1, 3));
        assert_eq!(HeaderType::detect(b"c\x02\x00m").unwrap().0, HeaderType::Call1Reply2);
        assert_eq!(HeaderType::detect(b"H\x02\x00C").unwrap().0, HeaderType::Hessian2);
        assert_eq!(HeaderType::detect(b"H\x02\x00R").unwrap().0, HeaderType::Reply2);
        assert_eq!(HeaderType::detect(b"r\x01\x00").unwrap().0, HeaderType::Reply1);

        let err = HeaderType::detect(b"x\x01\x00").unwrap_err();
        assert!(err.to_string().contains("x 0x78 is an unknown Hessian message code"));
        assert!(HeaderType::detect(b"").is_err());
        assert!(HeaderType::detect(b"c\x01").is_err());

        assert_eq!(HeaderType::Call1Reply2.reply_version(), Version::Hessian2);
        assert_eq!(HeaderType::Call1Reply2.body_version(), Version::Hessian1);
        assert_eq!(HeaderType::Call1Reply1.reply_version(), Version::Hessian1);
    }

    #[test]
    fn test_hessian2_call_bytes() {
        let call = Call::new("add", vec![Value::Int(1), Value::Int(2)]);
        let bytes = encode_call(Version::Hessian2, &call, registry()).unwrap();
        assert_eq!(
            bytes,
            vec![b'H', 0x02, 0x00, b'C', 0x03, b'a', b'd', b'd', 0x92, 0x91, 0x92]
        );

        let (header, decoded) = decode_call(&bytes, registry()).unwrap();
        assert_eq!(header, HeaderType::Hessian2);
        assert_eq!(decoded, call);
    }

    #[test]
    fn test_hessian1_call_round_trip() {
        let call = Call::new("echo", vec![Value::from("hi"), Value::Null]);
        let bytes = encode_call(Version::Hessian1, &call, registry()).unwrap();
        assert!(bytes.starts_with(b"c\x01\x00m\x00\x04echo"));
        assert_eq!(bytes.last(), Some(&b'z'));

        let (header, decoded) = decode_call(&bytes, registry()).unwrap();
        assert_eq!(header, HeaderType::Call1Reply1);
        assert_eq!(decoded, call);
    }

    #[test]
    fn test_reply_round_trip() {
        for version in [Version::Hessian1, Version::Hessian2] {
            let reply = Reply::Value(Value::list(vec![Value::from("a"), Value::Long(1 << 40)]));
            let bytes = encode_reply(version, &reply, registry()).unwrap();

            let decoded = decode_reply(version, &bytes, registry()).unwrap();
            assert_eq!(
                decoded.into_result().unwrap(),
                Value::list(vec![Value::from("a"), Value::Long(1 << 40)])
            );
        }
    }

    #[test]
    fn test_fault_round_trip() {
        for version in [Version::Hessian1, Version::Hessian2] {
            let detail = Value::exception(RemoteException::new("java.lang.RuntimeException"));
            let reply = Reply::Fault(Fault::new(FAULT_SERVICE_EXCEPTION, "boom", Some(detail)));
            let bytes = encode_reply(version, &reply, registry()).unwrap();

            let err = decode_reply(version, &bytes, registry())
                .unwrap()
                .into_result()
                .unwrap_err();
            let Error::RemoteFault(fault) = err else {
                panic!("expected a fault, got {:?}", err);
            };
            assert_eq!(fault.code, "ServiceException");
            assert_eq!(fault.message, "boom");
            assert_eq!(fault.kind(), FaultKind::Service);

            let exception = fault.exception().unwrap();
            assert_eq!(exception.read().type_name, "java.lang.RuntimeException");
            assert_eq!(exception.read().message.as_deref(), Some("boom"));
        }
    }

    #[test]
    fn test_deeply_nested_call_is_rejected() {
        let mut frame = vec![b'H', 2, 0, b'C', 0x01, b'x', 0x91];
        frame.extend(vec![0x57; 200_000]);

        let err = decode_call(&frame, registry()).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "{:?}", err);
    }

    #[test]
    fn test_reply_is_not_a_call() {
        let bytes = encode_reply(Version::Hessian2, &Reply::Value(Value::Null), registry()).unwrap();
        assert!(decode_call(&bytes, registry()).is_err());
    }

    #[test]
    fn test_call_state_order() {
        let mut state = CallState::default();
        assert!(!state.ingest(CallEvent::ArgCount));
        assert!(state.ingest(CallEvent::CallTag));
        assert!(state.ingest(CallEvent::MethodName));
        assert!(state.ingest(CallEvent::ArgCount));
        assert!(state.ingest(CallEvent::ArgumentsDone));
        assert_eq!(state, CallState::Complete);
        assert!(step(&mut state, CallEvent::CallTag).is_err());
    }
}
