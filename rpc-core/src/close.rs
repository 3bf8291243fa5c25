// --------------------------------------------------------------------------------
// --------------------------------------------------------------------------------

/// WebSocket close codes, as exchanged on the wire.
///
/// Only the subset this system actually sends or classifies is given a name;
/// everything else round-trips through its numeric value.
#[allow(non_camel_case_types)]
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum CloseCode {
	/// Normal closure.
	_1000_Normal,
	/// Shutdown, or the client gave up reconnecting.
	_1001_GoingAway,
	/// Protocol error: bad-message threshold crossed, or an unanswered ping.
	_1002_ProtocolError,
	_1003_UnsupportedData,
	_1005_NoStatusReceived,
	/// Abnormal closure; surfaced to a caller whose `connect` never completed.
	_1006_Abnormal,
	_1007_InvalidPayloadData,
	_1008_PolicyViolation,
	_1009_MessageTooBig,
	_1010_MandatoryExtension,
	_1011_InternalError,
	Other(u16),
}

impl From<u16> for CloseCode {
	fn from(code: u16) -> CloseCode {
		use CloseCode::*;

		match code {
			1000 => _1000_Normal,
			1001 => _1001_GoingAway,
			1002 => _1002_ProtocolError,
			1003 => _1003_UnsupportedData,
			1005 => _1005_NoStatusReceived,
			1006 => _1006_Abnormal,
			1007 => _1007_InvalidPayloadData,
			1008 => _1008_PolicyViolation,
			1009 => _1009_MessageTooBig,
			1010 => _1010_MandatoryExtension,
			1011 => _1011_InternalError,
			other => Other(other),
		}
	}
}

impl From<CloseCode> for u16 {
	fn from(code: CloseCode) -> u16 {
		use CloseCode::*;

		match code {
			_1000_Normal => 1000,
			_1001_GoingAway => 1001,
			_1002_ProtocolError => 1002,
			_1003_UnsupportedData => 1003,
			_1005_NoStatusReceived => 1005,
			_1006_Abnormal => 1006,
			_1007_InvalidPayloadData => 1007,
			_1008_PolicyViolation => 1008,
			_1009_MessageTooBig => 1009,
			_1010_MandatoryExtension => 1010,
			_1011_InternalError => 1011,
			Other(code) => code,
		}
	}
}

// --------------------------------------------------------------------------------

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn round_trips_known_codes() {
		for code in [1000u16, 1001, 1002, 1006, 1011, 4200] {
			let close_code = CloseCode::from(code);
			assert_eq!(u16::from(close_code), code);
		}
	}
}
