use std::borrow::Cow;

use crate::error::{MetricError, MetricResult};

// maximum length of instrument name
const INSTRUMENT_NAME_MAX_LENGTH: usize = 255;
// maximum length of instrument unit name
const INSTRUMENT_UNIT_NAME_MAX_LENGTH: usize = 63;
const INSTRUMENT_NAME_ALLOWED_NON_ALPHANUMERIC_CHARS: [char; 4] = ['_', '.', '-', '/'];

// instrument validation error strings
pub(crate) const INSTRUMENT_NAME_EMPTY: &str = "instrument name must be non-empty";
pub(crate) const INSTRUMENT_NAME_LENGTH: &str =
    "instrument name must be less than 256 characters";
pub(crate) const INSTRUMENT_NAME_INVALID_CHAR: &str =
    "characters in instrument name must be ASCII and belong to the alphanumeric characters, '_', '.', '-' and '/'";
pub(crate) const INSTRUMENT_NAME_FIRST_ALPHABETIC: &str =
    "instrument name must start with an alphabetic character";
pub(crate) const INSTRUMENT_UNIT_LENGTH: &str =
    "instrument unit must be less than 64 characters";
pub(crate) const INSTRUMENT_UNIT_INVALID_CHAR: &str =
    "characters in instrument unit must be ASCII";

/// The identifier of a group of instruments that all perform the same function.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum InstrumentKind {
    /// Identifies a group of instruments that record increasing values synchronously
    /// with the code path they are measuring.
    Counter,
    /// A group of instruments that record increasing and decreasing values
    /// synchronously with the code path they are measuring.
    UpDownCounter,
    /// A group of instruments that record a distribution of values synchronously with
    /// the code path they are measuring.
    Histogram,
    /// A group of instruments that record current value synchronously with
    /// the code path they are measuring.
    Gauge,
    /// A group of instruments that record increasing values in an asynchronous
    /// callback.
    ObservableCounter,
    /// A group of instruments that record increasing and decreasing values in an
    /// asynchronous callback.
    ObservableUpDownCounter,
    /// A group of instruments that record current values in an asynchronous callback.
    ObservableGauge,
}

impl InstrumentKind {
    /// Whether instruments of this kind only accept non-negative values.
    pub(crate) fn monotonic(&self) -> bool {
        matches!(
            self,
            InstrumentKind::Counter | InstrumentKind::ObservableCounter | InstrumentKind::Histogram
        )
    }

    /// Whether instruments of this kind report measurements through callbacks.
    pub fn is_observable(&self) -> bool {
        matches!(
            self,
            InstrumentKind::ObservableCounter
                | InstrumentKind::ObservableUpDownCounter
                | InstrumentKind::ObservableGauge
        )
    }
}

/// The underlying data type recorded by an instrument.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Default)]
pub enum ValueType {
    /// Whole-number measurements. Floating-point input is truncated.
    Int,
    /// Floating-point measurements.
    #[default]
    Double,
}

/// Optional hints an instrument supplies at creation time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Advice {
    /// Suggested explicit bucket boundaries for histogram instruments.
    ///
    /// Honored when no view overrides the aggregation.
    pub explicit_bucket_boundaries: Option<Vec<f64>>,
}

/// The identity of one instrument stream.
#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentDescriptor {
    pub(crate) name: Cow<'static, str>,
    pub(crate) description: Cow<'static, str>,
    pub(crate) unit: Cow<'static, str>,
    pub(crate) kind: InstrumentKind,
    pub(crate) value_type: ValueType,
    pub(crate) advice: Advice,
}

impl InstrumentDescriptor {
    /// A descriptor with an empty description and unit and no advice.
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        kind: InstrumentKind,
        value_type: ValueType,
    ) -> Self {
        InstrumentDescriptor {
            name: name.into(),
            description: Cow::Borrowed(""),
            unit: Cow::Borrowed(""),
            kind,
            value_type,
            advice: Advice::default(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the unit of measurement.
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Set the advice.
    pub fn with_advice(mut self, advice: Advice) -> Self {
        self.advice = advice;
        self
    }

    /// Instrument name.
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    /// Instrument description.
    pub fn description(&self) -> &str {
        self.description.as_ref()
    }

    /// Instrument unit.
    pub fn unit(&self) -> &str {
        self.unit.as_ref()
    }

    /// Instrument kind.
    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    /// Instrument value type.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Instrument advice.
    pub fn advice(&self) -> &Advice {
        &self.advice
    }

    /// Whether two descriptors identify the same stream.
    ///
    /// Names are compared case-insensitively; kind, unit and value type must
    /// match exactly. Descriptions are deliberately excluded, a mismatch there
    /// is resolved by keeping the longer one rather than splitting the stream.
    pub fn is_compatible_with(&self, other: &InstrumentDescriptor) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.kind == other.kind
            && self.unit == other.unit
            && self.value_type == other.value_type
    }
}

pub(crate) fn validate_instrument_name(name: &str) -> MetricResult<()> {
    if name.is_empty() {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_EMPTY,
        ));
    }
    if name.len() > INSTRUMENT_NAME_MAX_LENGTH {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_LENGTH,
        ));
    }
    if name.starts_with(|c: char| !c.is_ascii_alphabetic()) {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_FIRST_ALPHABETIC,
        ));
    }
    if name.contains(|c: char| {
        !c.is_ascii_alphanumeric() && !INSTRUMENT_NAME_ALLOWED_NON_ALPHANUMERIC_CHARS.contains(&c)
    }) {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_INVALID_CHAR,
        ));
    }
    Ok(())
}

pub(crate) fn validate_instrument_unit(unit: &str) -> MetricResult<()> {
    if unit.len() > INSTRUMENT_UNIT_NAME_MAX_LENGTH {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_UNIT_LENGTH,
        ));
    }
    if unit.contains(|c: char| !c.is_ascii()) {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_UNIT_INVALID_CHAR,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_name_validation() {
        // (name, expected error)
        let test_cases = vec![
            ("validateName", ""),
            ("_startWithNoneAlphabet", INSTRUMENT_NAME_FIRST_ALPHABETIC),
            ("utf8char锈", INSTRUMENT_NAME_INVALID_CHAR),
            ("a".repeat(255).leak(), ""),
            ("a".repeat(256).leak(), INSTRUMENT_NAME_LENGTH),
            ("invalid name", INSTRUMENT_NAME_INVALID_CHAR),
            ("allow/slash", ""),
            ("allow_under_score", ""),
            ("allow.dots.ok", ""),
            ("", INSTRUMENT_NAME_EMPTY),
            ("\\allow\\slash /sec", INSTRUMENT_NAME_FIRST_ALPHABETIC),
            ("Total $ Count", INSTRUMENT_NAME_INVALID_CHAR),
        ];

        for (name, expected_error) in test_cases {
            let result = validate_instrument_name(name);
            if expected_error.is_empty() {
                assert!(result.is_ok(), "expected valid name '{name}'");
            } else {
                assert_eq!(
                    result.err().map(|e| e.to_string()),
                    Some(format!("Invalid instrument configuration: {expected_error}")),
                    "checking name '{name}'"
                );
            }
        }
    }

    #[test]
    fn instrument_unit_validation() {
        let test_cases = vec![
            (
                "0123456789012345678901234567890123456789012345678901234567890123",
                INSTRUMENT_UNIT_LENGTH,
            ),
            ("utf8char锈", INSTRUMENT_UNIT_INVALID_CHAR),
            ("kb", ""),
            ("Kb/sec", ""),
            ("%", ""),
            ("", ""),
        ];

        for (unit, expected_error) in test_cases {
            let result = validate_instrument_unit(unit);
            if expected_error.is_empty() {
                assert!(result.is_ok(), "expected valid unit '{unit}'");
            } else {
                assert!(result.is_err(), "expected invalid unit '{unit}'");
            }
        }
    }

    #[test]
    fn descriptor_compatibility() {
        let a = InstrumentDescriptor::new("requests", InstrumentKind::Counter, ValueType::Int);
        let b = InstrumentDescriptor::new("Requests", InstrumentKind::Counter, ValueType::Int)
            .with_description("total requests");
        assert!(a.is_compatible_with(&b));

        let c = InstrumentDescriptor::new("requests", InstrumentKind::UpDownCounter, ValueType::Int);
        assert!(!a.is_compatible_with(&c));

        let d = InstrumentDescriptor::new("requests", InstrumentKind::Counter, ValueType::Double);
        assert!(!a.is_compatible_with(&d));

        let e = InstrumentDescriptor::new("requests", InstrumentKind::Counter, ValueType::Int)
            .with_unit("{request}");
        assert!(!a.is_compatible_with(&e));
    }
}
