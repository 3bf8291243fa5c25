//! Strict-mode schema validation (§4.2, C2).
//!
//! A [`ValidatorRegistry`] maps a negotiated subprotocol to a [`Validator`].
//! The peer engine asks it to validate both inbound requests (CALL) and
//! inbound responses (CALLRESULT) when strict mode is active for that
//! subprotocol; a validation failure carries the JSON-schema `keyword` that
//! tripped, which the registry maps to an OCPP wire error code.

use std::{collections::HashMap, sync::Arc};

use rpc_core::{CallError, ErrorCode, Json};

// --------------------------------------------------------------------------------
// --------------------------------------------------------------------------------

/// Which side of a CALL a payload was validated as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationDirection {
	/// An inbound CALL's `Params`.
	Request,
	/// An inbound CALLRESULT's `Result`.
	Response,
}

/// A single JSON-schema failure, in the shape produced by `jsonschema`.
#[derive(Debug, Clone)]
pub struct ValidationFailure {
	pub keyword: String,
	pub instance_path: String,
	pub message: String,
}

impl ValidationFailure {
	/// Maps this failure to the CALLERROR it should produce, per §4.2's table.
	pub fn into_call_error(self) -> CallError {
		let code = ErrorCode::from_validation_keyword(&self.keyword);

		CallError::new(code, self.message).with_details(Json::String(self.instance_path))
	}
}

/// Validates a method's request and response payloads against a schema set
/// for one subprotocol.
pub trait Validator: Send + Sync {
	fn validate(
		&self,
		direction: ValidationDirection,
		method: &str,
		payload: &Json,
	) -> Result<(), ValidationFailure>;
}

// --------------------------------------------------
// ValidatorRegistry

/// Maps a negotiated subprotocol to the [`Validator`] that enforces it.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
	validators: HashMap<String, Arc<dyn Validator>>,
}

impl ValidatorRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, subprotocol: impl Into<String>, validator: Arc<dyn Validator>) {
		self.validators.insert(subprotocol.into(), validator);
	}

	pub fn get(&self, subprotocol: &str) -> Option<Arc<dyn Validator>> {
		self.validators.get(subprotocol).cloned()
	}

	pub fn contains(&self, subprotocol: &str) -> bool {
		self.validators.contains_key(subprotocol)
	}
}

// --------------------------------------------------------------------------------
// JsonSchemaValidator

/// A [`Validator`] backed by compiled `jsonschema` validators, one schema per
/// `(direction, method)` pair. A method with no registered schema for a given
/// direction is treated as having nothing to check.
pub struct JsonSchemaValidator {
	request_schemas: HashMap<String, jsonschema::Validator>,
	response_schemas: HashMap<String, jsonschema::Validator>,
}

impl Validator for JsonSchemaValidator {
	fn validate(
		&self,
		direction: ValidationDirection,
		method: &str,
		payload: &Json,
	) -> Result<(), ValidationFailure> {
		let schemas = match direction {
			ValidationDirection::Request => &self.request_schemas,
			ValidationDirection::Response => &self.response_schemas,
		};

		let Some(validator) = schemas.get(method) else {
			return Ok(());
		};

		validator.validate(payload).map_err(|error| {
			let schema_path = error.schema_path.to_string();
			let keyword = schema_path
				.rsplit('/')
				.find(|segment| !segment.is_empty())
				.unwrap_or("type")
				.to_owned();

			ValidationFailure {
				keyword,
				instance_path: error.instance_path.to_string(),
				message: error.to_string(),
			}
		})
	}
}

/// Builds a [`JsonSchemaValidator`] by registering one JSON schema at a time.
#[derive(Default)]
pub struct JsonSchemaValidatorBuilder {
	request_schemas: HashMap<String, Json>,
	response_schemas: HashMap<String, Json>,
}

impl JsonSchemaValidatorBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn request_schema(mut self, method: impl Into<String>, schema: Json) -> Self {
		self.request_schemas.insert(method.into(), schema);

		self
	}

	pub fn response_schema(mut self, method: impl Into<String>, schema: Json) -> Self {
		self.response_schemas.insert(method.into(), schema);

		self
	}

	pub fn build(self) -> Result<JsonSchemaValidator, SchemaCompileError> {
		let compile = |schemas: HashMap<String, Json>| {
			schemas
				.into_iter()
				.map(|(method, schema)| {
					jsonschema::validator_for(&schema)
						.map(|compiled| (method, compiled))
						.map_err(|error| SchemaCompileError(error.to_string()))
				})
				.collect::<Result<HashMap<_, _>, _>>()
		};

		Ok(JsonSchemaValidator {
			request_schemas: compile(self.request_schemas)?,
			response_schemas: compile(self.response_schemas)?,
		})
	}
}

/// Returned when a registered schema is not itself valid JSON Schema.
#[derive(Debug, thiserror::Error)]
#[error("invalid JSON schema: {0}")]
pub struct SchemaCompileError(String);

// --------------------------------------------------------------------------------
// StrictMode

/// Which subprotocols, if any, require inbound schema validation.
#[derive(Debug, Clone, Default)]
pub enum StrictMode {
	#[default]
	Disabled,
	All,
	Only(Vec<String>),
}

impl StrictMode {
	pub(crate) fn requires(&self, subprotocol: &str) -> bool {
		match self {
			StrictMode::Disabled => false,
			StrictMode::All => true,
			StrictMode::Only(list) => list.iter().any(|entry| entry == subprotocol),
		}
	}
}

/// Returned by [`check_strict_mode_configured`] when a subprotocol strict
/// mode requires validation for has no registered validator.
#[derive(Debug, Clone, crate::ImplError)]
#[error("strict mode requires a validator for subprotocol {0:?}, but none is registered")]
pub struct StrictModeConfigError(pub String);

/// Checks, at configure time, that every subprotocol `strict_mode` requires
/// validation for actually has a validator registered — §4.2's "otherwise
/// construction fails at configure time."
pub(crate) fn check_strict_mode_configured(
	strict_mode: &StrictMode,
	protocols: &[String],
	validators: &ValidatorRegistry,
) -> Result<(), StrictModeConfigError> {
	match strict_mode {
		StrictMode::Disabled => Ok(()),
		StrictMode::All => protocols
			.iter()
			.find(|protocol| !validators.contains(protocol))
			.map_or(Ok(()), |protocol| Err(StrictModeConfigError(protocol.clone()))),
		StrictMode::Only(list) => list
			.iter()
			.find(|protocol| !validators.contains(protocol))
			.map_or(Ok(()), |protocol| Err(StrictModeConfigError(protocol.clone()))),
	}
}

// --------------------------------------------------------------------------------

#[cfg(test)]
mod test {
	use super::*;

	struct AlwaysFails;

	impl Validator for AlwaysFails {
		fn validate(
			&self,
			_direction: ValidationDirection,
			_method: &str,
			_payload: &Json,
		) -> Result<(), ValidationFailure> {
			Err(ValidationFailure {
				keyword: "required".into(),
				instance_path: "/connectorId".into(),
				message: "connectorId is required".into(),
			})
		}
	}

	#[test]
	fn failure_maps_to_occurence_constraint_violation() {
		let registry = {
			let mut registry = ValidatorRegistry::new();
			registry.register("ocpp1.6", Arc::new(AlwaysFails));
			registry
		};

		let validator = registry.get("ocpp1.6").unwrap();
		let failure = validator
			.validate(ValidationDirection::Request, "BootNotification", &Json::Null)
			.unwrap_err();

		let call_error = failure.into_call_error();
		assert_eq!(call_error.code, ErrorCode::OccurenceConstraintViolation);
	}

	#[test]
	fn strict_mode_only_covers_listed_subprotocols() {
		let mode = StrictMode::Only(vec!["ocpp1.6".into()]);
		assert!(mode.requires("ocpp1.6"));
		assert!(!mode.requires("ocpp2.0.1"));

		assert!(StrictMode::All.requires("anything"));
		assert!(!StrictMode::Disabled.requires("anything"));
	}

	#[test]
	fn check_strict_mode_configured_fails_when_a_required_subprotocol_has_no_validator() {
		let protocols = vec!["ocpp1.6".to_owned()];
		let validators = ValidatorRegistry::new();

		let error = check_strict_mode_configured(&StrictMode::All, &protocols, &validators).unwrap_err();
		assert_eq!(error.0, "ocpp1.6");

		let error =
			check_strict_mode_configured(&StrictMode::Only(protocols.clone()), &protocols, &validators).unwrap_err();
		assert_eq!(error.0, "ocpp1.6");
	}

	#[test]
	fn check_strict_mode_configured_passes_when_disabled_or_fully_covered() {
		let protocols = vec!["ocpp1.6".to_owned()];
		let mut validators = ValidatorRegistry::new();
		validators.register("ocpp1.6", Arc::new(AlwaysFails));

		assert!(check_strict_mode_configured(&StrictMode::Disabled, &protocols, &ValidatorRegistry::new()).is_ok());
		assert!(check_strict_mode_configured(&StrictMode::All, &protocols, &validators).is_ok());
	}
}
