use std::fmt;

use serde_json::Value as Json;

pub(crate) use thiserror::Error as ImplError;

// --------------------------------------------------------------------------------
// --------------------------------------------------------------------------------

// --------------------------------------------------
// ErrorCode

/// The OCPP wire vocabulary for CALLERROR frames.
///
/// Two spellings of the occurrence-constraint code circulate in the wild —
/// `Occurence…` (sic) and `Occurrence…`. Both are accepted on [`parse`](ErrorCode::parse);
/// [`as_wire_str`](ErrorCode::as_wire_str) emits the legacy spelling unless asked
/// for the corrected one, for compatibility with older peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
	GenericError,
	NotImplemented,
	NotSupported,
	InternalError,
	ProtocolError,
	SecurityError,
	FormationViolation,
	FormatViolation,
	PropertyConstraintViolation,
	OccurenceConstraintViolation,
	TypeConstraintViolation,
	MessageTypeNotSupported,
	RpcFrameworkError,
}

impl ErrorCode {
	/// Parses either spelling of an error-code string as it appears on the wire.
	pub fn parse(code: &str) -> Option<Self> {
		use ErrorCode::*;

		Some(match code {
			"GenericError" => GenericError,
			"NotImplemented" => NotImplemented,
			"NotSupported" => NotSupported,
			"InternalError" => InternalError,
			"ProtocolError" => ProtocolError,
			"SecurityError" => SecurityError,
			"FormationViolation" => FormationViolation,
			"FormatViolation" => FormatViolation,
			"PropertyConstraintViolation" => PropertyConstraintViolation,
			"OccurenceConstraintViolation" | "OccurrenceConstraintViolation" => {
				OccurenceConstraintViolation
			}
			"TypeConstraintViolation" => TypeConstraintViolation,
			"MessageTypeNotSupported" => MessageTypeNotSupported,
			"RpcFrameworkError" => RpcFrameworkError,
			_ => return None,
		})
	}

	/// Renders the code the way it should appear in an outbound CALLERROR frame.
	///
	/// `modern_spelling` toggles `OccurenceConstraintViolation` between the sic
	/// legacy spelling (`false`, the default) and the corrected one (`true`).
	pub fn as_wire_str(&self, modern_spelling: bool) -> &'static str {
		use ErrorCode::*;

		match self {
			GenericError => "GenericError",
			NotImplemented => "NotImplemented",
			NotSupported => "NotSupported",
			InternalError => "InternalError",
			ProtocolError => "ProtocolError",
			SecurityError => "SecurityError",
			FormationViolation => "FormationViolation",
			FormatViolation => "FormatViolation",
			PropertyConstraintViolation => "PropertyConstraintViolation",
			OccurenceConstraintViolation => {
				if modern_spelling {
					"OccurrenceConstraintViolation"
				} else {
					"OccurenceConstraintViolation"
				}
			}
			TypeConstraintViolation => "TypeConstraintViolation",
			MessageTypeNotSupported => "MessageTypeNotSupported",
			RpcFrameworkError => "RpcFrameworkError",
		}
	}

	/// Maps a JSON-schema validation failure keyword to the error code it should
	/// be reported as in a CALLERROR frame.
	pub fn from_validation_keyword(keyword: &str) -> Self {
		use ErrorCode::*;

		match keyword {
			"exclusiveMaximum" | "exclusiveMinimum" | "multipleOf" | "maxItems" | "minItems"
			| "maxProperties" | "minProperties" | "additionalItems" | "required" => {
				OccurenceConstraintViolation
			}
			"pattern" | "propertyNames" | "additionalProperties" => PropertyConstraintViolation,
			"type" => TypeConstraintViolation,
			_ => FormatViolation,
		}
	}
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_wire_str(false))
	}
}

// --------------------------------------------------------------------------------
// CallError

/// An error carried by a CALLERROR frame, or synthesized locally (timeout,
/// cancellation, disconnect) to reject a pending call in its place.
#[derive(Debug, Clone, ImplError)]
#[error("{code}: {description}")]
pub struct CallError {
	pub code: ErrorCode,
	pub description: String,
	pub details: Json,
}

impl CallError {
	pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
		Self {
			code,
			description: description.into(),
			details: Json::Object(Default::default()),
		}
	}

	pub fn with_details(mut self, details: Json) -> Self {
		self.details = details;

		self
	}

	/// A `GenericError` carrying `description`. Used for every error this system
	/// synthesizes itself rather than receives from the peer.
	pub fn generic(description: impl Into<String>) -> Self {
		Self::new(ErrorCode::GenericError, description)
	}

	pub fn timeout() -> Self {
		Self::generic("Call timeout")
	}

	pub fn aborted() -> Self {
		Self::generic("Call aborted")
	}

	pub fn disconnected() -> Self {
		Self::generic("Client disconnected")
	}

	pub fn closing() -> Self {
		Self::generic("Client closing")
	}

	pub fn internal(description: impl Into<String>) -> Self {
		Self::new(ErrorCode::InternalError, description)
	}
}

// --------------------------------------------------------------------------------

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn parses_both_occurence_spellings() {
		assert_eq!(
			ErrorCode::parse("OccurenceConstraintViolation"),
			Some(ErrorCode::OccurenceConstraintViolation)
		);
		assert_eq!(
			ErrorCode::parse("OccurrenceConstraintViolation"),
			Some(ErrorCode::OccurenceConstraintViolation)
		);
	}

	#[test]
	fn emits_legacy_spelling_by_default() {
		assert_eq!(
			ErrorCode::OccurenceConstraintViolation.as_wire_str(false),
			"OccurenceConstraintViolation"
		);
		assert_eq!(
			ErrorCode::OccurenceConstraintViolation.as_wire_str(true),
			"OccurrenceConstraintViolation"
		);
	}

	#[test]
	fn unknown_code_does_not_parse() {
		assert_eq!(ErrorCode::parse("NotACode"), None);
	}

	#[test]
	fn validation_keyword_mapping() {
		assert_eq!(
			ErrorCode::from_validation_keyword("required"),
			ErrorCode::OccurenceConstraintViolation
		);
		assert_eq!(
			ErrorCode::from_validation_keyword("pattern"),
			ErrorCode::PropertyConstraintViolation
		);
		assert_eq!(
			ErrorCode::from_validation_keyword("type"),
			ErrorCode::TypeConstraintViolation
		);
		assert_eq!(
			ErrorCode::from_validation_keyword("maxLength"),
			ErrorCode::FormatViolation
		);
		assert_eq!(
			ErrorCode::from_validation_keyword("something-unheard-of"),
			ErrorCode::FormatViolation
		);
	}
}
