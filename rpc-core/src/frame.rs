use serde_json::Value as Json;

use crate::error::ErrorCode;

// --------------------------------------------------------------------------------
// --------------------------------------------------------------------------------

/// An opaque, non-empty identifier unique to the sending side for the lifetime
/// of the connection.
pub type MessageId = String;

// --------------------------------------------------
// Frame

/// A single decoded WebSocket text message, classified by its leading
/// message-type integer.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
	/// `[2, MessageId, Method, Params]`
	Call(CallFrame),
	/// `[3, MessageId, Result]`
	Result(ResultFrame),
	/// `[4, MessageId, ErrorCode, ErrorDescription, ErrorDetails]`
	Error(ErrorFrame),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallFrame {
	pub message_id: MessageId,
	pub method: String,
	pub params: Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultFrame {
	pub message_id: MessageId,
	pub result: Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorFrame {
	pub message_id: MessageId,
	pub error_code: ErrorCode,
	pub error_description: String,
	pub error_details: Json,
}

impl Frame {
	pub fn call(message_id: impl Into<String>, method: impl Into<String>, params: Json) -> Self {
		Frame::Call(CallFrame {
			message_id: message_id.into(),
			method: method.into(),
			params,
		})
	}

	pub fn result(message_id: impl Into<String>, result: Json) -> Self {
		Frame::Result(ResultFrame {
			message_id: message_id.into(),
			result,
		})
	}

	pub fn message_id(&self) -> &str {
		match self {
			Frame::Call(call) => &call.message_id,
			Frame::Result(result) => &result.message_id,
			Frame::Error(error) => &error.message_id,
		}
	}

	/// Decodes one WebSocket text message into a classified frame, or a
	/// [`MalformedFrame`] describing why it couldn't be.
	pub fn decode(text: &str) -> Result<Frame, MalformedFrame> {
		let value: Json = serde_json::from_str(text).map_err(|_| MalformedFrame {
			reason: MalformedReason::InvalidJson,
		})?;

		let Json::Array(elements) = value else {
			return Err(MalformedFrame {
				reason: MalformedReason::NotAnArray,
			});
		};

		let Some(message_type) = elements.first().and_then(Json::as_u64) else {
			return Err(MalformedFrame {
				reason: MalformedReason::MissingMessageType,
			});
		};

		match message_type {
			2 => decode_call(&elements),
			3 => decode_result(&elements),
			4 => decode_error(&elements),
			other => Err(MalformedFrame {
				reason: MalformedReason::UnknownMessageType(other),
			}),
		}
	}

	/// Encodes the frame back into a WebSocket text message.
	///
	/// `modern_error_spelling` only affects [`Frame::Error`] — see
	/// [`ErrorCode::as_wire_str`].
	pub fn encode(&self, modern_error_spelling: bool) -> String {
		let value = match self {
			Frame::Call(CallFrame {
				message_id,
				method,
				params,
			}) => Json::Array(vec![
				Json::from(2),
				Json::from(message_id.as_str()),
				Json::from(method.as_str()),
				params.clone(),
			]),
			Frame::Result(ResultFrame { message_id, result }) => Json::Array(vec![
				Json::from(3),
				Json::from(message_id.as_str()),
				result.clone(),
			]),
			Frame::Error(ErrorFrame {
				message_id,
				error_code,
				error_description,
				error_details,
			}) => Json::Array(vec![
				Json::from(4),
				Json::from(message_id.as_str()),
				Json::from(error_code.as_wire_str(modern_error_spelling)),
				Json::from(error_description.as_str()),
				error_details.clone(),
			]),
		};

		// A `Frame` is always representable in JSON; nothing here can fail.
		serde_json::to_string(&value).expect("a Frame value is always serializable")
	}
}

fn decode_call(elements: &[Json]) -> Result<Frame, MalformedFrame> {
	let [_, message_id, method, params] = require_arity(elements, 4)?;

	let message_id = non_empty_string(message_id)?;
	let method = method
		.as_str()
		.ok_or(MalformedFrame {
			reason: MalformedReason::MethodNotString,
		})?
		.to_owned();

	require_object(params, MalformedReason::ParamsNotObject)?;

	Ok(Frame::Call(CallFrame {
		message_id,
		method,
		params: params.clone(),
	}))
}

fn decode_result(elements: &[Json]) -> Result<Frame, MalformedFrame> {
	let [_, message_id, result] = require_arity(elements, 3)?;

	let message_id = non_empty_string(message_id)?;
	require_object(result, MalformedReason::ResultNotObject)?;

	Ok(Frame::Result(ResultFrame {
		message_id,
		result: result.clone(),
	}))
}

fn decode_error(elements: &[Json]) -> Result<Frame, MalformedFrame> {
	let [_, message_id, error_code, error_description, error_details] = require_arity(elements, 5)?;

	let message_id = non_empty_string(message_id)?;

	let error_code_str = error_code.as_str().ok_or(MalformedFrame {
		reason: MalformedReason::ErrorCodeNotString,
	})?;

	let error_code = ErrorCode::parse(error_code_str).ok_or_else(|| MalformedFrame {
		reason: MalformedReason::UnknownErrorCode(error_code_str.to_owned()),
	})?;

	let error_description = error_description
		.as_str()
		.ok_or(MalformedFrame {
			reason: MalformedReason::ErrorDescriptionNotString,
		})?
		.to_owned();

	require_object(error_details, MalformedReason::ErrorDetailsNotObject)?;

	Ok(Frame::Error(ErrorFrame {
		message_id,
		error_code,
		error_description,
		error_details: error_details.clone(),
	}))
}

fn require_arity<const N: usize>(
	elements: &[Json],
	expected: usize,
) -> Result<[&Json; N], MalformedFrame> {
	if elements.len() != expected {
		return Err(MalformedFrame {
			reason: MalformedReason::WrongArity {
				expected,
				got: elements.len(),
			},
		});
	}

	Ok(std::array::from_fn(|index| &elements[index]))
}

fn non_empty_string(value: &Json) -> Result<String, MalformedFrame> {
	match value.as_str() {
		Some(string) if !string.is_empty() => Ok(string.to_owned()),
		_ => Err(MalformedFrame {
			reason: MalformedReason::InvalidMessageId,
		}),
	}
}

fn require_object(value: &Json, reason: MalformedReason) -> Result<(), MalformedFrame> {
	if value.is_object() {
		Ok(())
	} else {
		Err(MalformedFrame { reason })
	}
}

// --------------------------------------------------------------------------------
// Malformed

/// Why a message failed to decode into a [`Frame`]. Carried in `badMessage` events.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedFrame {
	pub reason: MalformedReason,
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum MalformedReason {
	InvalidJson,
	NotAnArray,
	MissingMessageType,
	UnknownMessageType(u64),
	WrongArity { expected: usize, got: usize },
	InvalidMessageId,
	MethodNotString,
	ParamsNotObject,
	ResultNotObject,
	ErrorCodeNotString,
	ErrorDescriptionNotString,
	ErrorDetailsNotObject,
	UnknownErrorCode(String),
}

impl std::fmt::Display for MalformedReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		use MalformedReason::*;

		match self {
			InvalidJson => write!(f, "message is not valid JSON"),
			NotAnArray => write!(f, "message is not a JSON array"),
			MissingMessageType => write!(f, "missing message-type element"),
			UnknownMessageType(kind) => write!(f, "unknown message type {kind}"),
			WrongArity { expected, got } => {
				write!(f, "expected {expected} elements, got {got}")
			}
			InvalidMessageId => write!(f, "MessageId is not a non-empty string"),
			MethodNotString => write!(f, "Method is not a string"),
			ParamsNotObject => write!(f, "Params is not an object"),
			ResultNotObject => write!(f, "Result is not an object"),
			ErrorCodeNotString => write!(f, "ErrorCode is not a string"),
			ErrorDescriptionNotString => write!(f, "ErrorDescription is not a string"),
			ErrorDetailsNotObject => write!(f, "ErrorDetails is not an object"),
			UnknownErrorCode(code) => write!(f, "unrecognized error code {code:?}"),
		}
	}
}

impl std::error::Error for MalformedReason {}

// --------------------------------------------------------------------------------

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn decodes_call() {
		let frame = Frame::decode(r#"[2,"abc123","Heartbeat",{}]"#).unwrap();

		assert_eq!(
			frame,
			Frame::Call(CallFrame {
				message_id: "abc123".into(),
				method: "Heartbeat".into(),
				params: Json::Object(Default::default()),
			})
		);
	}

	#[test]
	fn decodes_result() {
		let frame = Frame::decode(r#"[3,"abc123",{"status":"Accepted"}]"#).unwrap();

		assert!(matches!(frame, Frame::Result(ResultFrame { message_id, .. }) if message_id == "abc123"));
	}

	#[test]
	fn decodes_error_with_both_occurence_spellings() {
		let legacy = Frame::decode(r#"[4,"id","OccurenceConstraintViolation","bad",{}]"#).unwrap();
		let corrected = Frame::decode(r#"[4,"id","OccurrenceConstraintViolation","bad",{}]"#).unwrap();

		assert_eq!(legacy, corrected);
		assert_eq!(
			legacy,
			Frame::Error(ErrorFrame {
				message_id: "id".into(),
				error_code: ErrorCode::OccurenceConstraintViolation,
				error_description: "bad".into(),
				error_details: Json::Object(Default::default()),
			})
		);
	}

	#[test]
	fn rejects_error_details_that_are_not_an_object() {
		let err = Frame::decode(r#"[4,"id","GenericError","bad","{}"]"#).unwrap_err();
		assert_eq!(err.reason, MalformedReason::ErrorDetailsNotObject);
	}

	#[test]
	fn round_trips_through_encode_decode() {
		let original = Frame::call("id1", "Foo", Json::Object(Default::default()));
		let encoded = original.encode(false);
		let decoded = Frame::decode(&encoded).unwrap();

		assert_eq!(original, decoded);
	}

	#[test]
	fn rejects_non_array() {
		let err = Frame::decode(r#"{"not":"an array"}"#).unwrap_err();
		assert_eq!(err.reason, MalformedReason::NotAnArray);
	}

	#[test]
	fn rejects_empty_message_id() {
		let err = Frame::decode(r#"[2,"","Foo",{}]"#).unwrap_err();
		assert_eq!(err.reason, MalformedReason::InvalidMessageId);
	}

	#[test]
	fn rejects_wrong_arity() {
		let err = Frame::decode(r#"[2,"id","Foo"]"#).unwrap_err();
		assert_eq!(
			err.reason,
			MalformedReason::WrongArity {
				expected: 4,
				got: 3
			}
		);
	}

	#[test]
	fn rejects_unknown_message_type() {
		let err = Frame::decode(r#"[9,"id"]"#).unwrap_err();
		assert_eq!(err.reason, MalformedReason::UnknownMessageType(9));
	}

	#[test]
	fn encodes_error_with_legacy_spelling_by_default() {
		let frame = Frame::Error(ErrorFrame {
			message_id: "id".into(),
			error_code: ErrorCode::OccurenceConstraintViolation,
			error_description: "bad".into(),
			error_details: Json::Object(Default::default()),
		});

		assert!(frame.encode(false).contains("OccurenceConstraintViolation"));
		assert!(frame.encode(true).contains("OccurrenceConstraintViolation"));
	}
}
