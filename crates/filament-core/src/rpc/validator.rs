use tracing::warn;

use super::message::RpcMessage;

/// Classification of a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcValidationErrorType {
    InvalidValue,
    TooManyParameters,
    TooFewParameters,
    SecurityViolation,
    InvalidFormat,
}

/// Character classes accepted for string parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPattern {
    PrintableAscii,
    Alphanumeric,
    NoControlChars,
}

impl StringPattern {
    fn matches(self, s: &str) -> bool {
        match self {
            StringPattern::PrintableAscii => {
                s.chars().all(|c| (' '..='~').contains(&c))
            }
            StringPattern::Alphanumeric => s.chars().all(char::is_alphanumeric),
            StringPattern::NoControlChars => !s.chars().any(char::is_control),
        }
    }
}

/// A single per-parameter constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationRule {
    /// Numeric parameter at `index` must be within `min..=max`.
    NumericRange { index: usize, min: u16, max: u16 },
    /// Numeric parameter at `index` must be one of `values`.
    AllowedValues { index: usize, values: Vec<u16> },
    /// String parameter at `index` must not exceed `max_len` characters.
    StringLength { index: usize, max_len: usize },
    /// String parameter at `index` must match `pattern`.
    StringMatches { index: usize, pattern: StringPattern },
}

#[derive(Debug, Clone)]
struct RuleEntry {
    rule: ValidationRule,
    security_sensitive: bool,
}

/// A validation verdict carrying its classification and security flag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationFailure {
    pub error_type: RpcValidationErrorType,
    pub message: String,
    pub is_security_violation: bool,
}

/// Deterministic, panic-free parameter validation applied before any
/// handler runs.
#[derive(Debug, Clone, Default)]
pub struct ParameterValidator {
    rules: Vec<RuleEntry>,
    min_params: usize,
    max_params: Option<usize>,
    security_sensitive: bool,
}

impl ParameterValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(RuleEntry {
            rule,
            security_sensitive: false,
        });
        self
    }

    /// A rule whose violation is flagged and logged as a security event.
    pub fn sensitive_rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(RuleEntry {
            rule,
            security_sensitive: true,
        });
        self
    }

    pub fn min_params(mut self, min: usize) -> Self {
        self.min_params = min;
        self
    }

    pub fn max_params(mut self, max: usize) -> Self {
        self.max_params = Some(max);
        self
    }

    /// Mark the whole command as security-sensitive: any violation is a
    /// security violation.
    pub fn security_sensitive(mut self) -> Self {
        self.security_sensitive = true;
        self
    }

    pub fn is_security_sensitive(&self) -> bool {
        self.security_sensitive
    }

    pub fn validate(&self, message: &RpcMessage) -> Result<(), ValidationFailure> {
        let total = message.numeric_params.len() + message.string_params.len();
        if total < self.min_params {
            return Err(self.fail(
                RpcValidationErrorType::TooFewParameters,
                format!("expected at least {} parameters, got {total}", self.min_params),
                false,
            ));
        }
        if let Some(max) = self.max_params {
            if total > max {
                return Err(self.fail(
                    RpcValidationErrorType::TooManyParameters,
                    format!("expected at most {max} parameters, got {total}"),
                    false,
                ));
            }
        }

        for entry in &self.rules {
            if let Err(mut failure) = self.check_rule(&entry.rule, message) {
                if entry.security_sensitive || self.security_sensitive {
                    failure.is_security_violation = true;
                }
                if failure.is_security_violation {
                    warn!(
                        command_id = message.command_id,
                        error = %failure.message,
                        "security-sensitive RPC parameter validation failed"
                    );
                }
                return Err(failure);
            }
        }
        Ok(())
    }

    fn check_rule(
        &self,
        rule: &ValidationRule,
        message: &RpcMessage,
    ) -> Result<(), ValidationFailure> {
        match rule {
            ValidationRule::NumericRange { index, min, max } => {
                match message.numeric_params.get(*index) {
                    None => Err(self.fail(
                        RpcValidationErrorType::TooFewParameters,
                        format!("missing numeric parameter {index}"),
                        false,
                    )),
                    Some(v) if v < min || v > max => Err(self.fail(
                        RpcValidationErrorType::InvalidValue,
                        format!("parameter {index} = {v} outside {min}..={max}"),
                        false,
                    )),
                    Some(_) => Ok(()),
                }
            }
            ValidationRule::AllowedValues { index, values } => {
                match message.numeric_params.get(*index) {
                    None => Err(self.fail(
                        RpcValidationErrorType::TooFewParameters,
                        format!("missing numeric parameter {index}"),
                        false,
                    )),
                    Some(v) if !values.contains(v) => Err(self.fail(
                        RpcValidationErrorType::InvalidValue,
                        format!("parameter {index} = {v} not an allowed value"),
                        false,
                    )),
                    Some(_) => Ok(()),
                }
            }
            ValidationRule::StringLength { index, max_len } => {
                match message.string_params.get(*index) {
                    None => Err(self.fail(
                        RpcValidationErrorType::TooFewParameters,
                        format!("missing string parameter {index}"),
                        false,
                    )),
                    Some(s) if s.chars().count() > *max_len => Err(self.fail(
                        RpcValidationErrorType::InvalidValue,
                        format!("string parameter {index} exceeds {max_len} characters"),
                        false,
                    )),
                    Some(_) => Ok(()),
                }
            }
            ValidationRule::StringMatches { index, pattern } => {
                match message.string_params.get(*index) {
                    None => Err(self.fail(
                        RpcValidationErrorType::TooFewParameters,
                        format!("missing string parameter {index}"),
                        false,
                    )),
                    Some(s) if !pattern.matches(s) => Err(self.fail(
                        RpcValidationErrorType::InvalidFormat,
                        format!("string parameter {index} does not match {pattern:?}"),
                        false,
                    )),
                    Some(_) => Ok(()),
                }
            }
        }
    }

    fn fail(
        &self,
        error_type: RpcValidationErrorType,
        message: String,
        is_security_violation: bool,
    ) -> ValidationFailure {
        ValidationFailure {
            error_type,
            message,
            is_security_violation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::message::RpcCommandType;

    fn message(numeric: Vec<u16>, strings: Vec<&str>) -> RpcMessage {
        RpcMessage::new(RpcCommandType::Query, 2500)
            .unwrap()
            .with_numeric_params(numeric)
            .with_string_params(strings.into_iter().map(String::from).collect())
    }

    #[test]
    fn numeric_range_boundaries() {
        let validator = ParameterValidator::new().rule(ValidationRule::NumericRange {
            index: 0,
            min: 10,
            max: 20,
        });
        assert!(validator.validate(&message(vec![10], vec![])).is_ok());
        assert!(validator.validate(&message(vec![20], vec![])).is_ok());

        let failure = validator.validate(&message(vec![21], vec![])).unwrap_err();
        assert_eq!(failure.error_type, RpcValidationErrorType::InvalidValue);
        assert!(!failure.is_security_violation);
    }

    #[test]
    fn allowed_values() {
        let validator = ParameterValidator::new().rule(ValidationRule::AllowedValues {
            index: 0,
            values: vec![1, 2, 3],
        });
        assert!(validator.validate(&message(vec![2], vec![])).is_ok());
        assert!(validator.validate(&message(vec![4], vec![])).is_err());
    }

    #[test]
    fn count_bounds() {
        let validator = ParameterValidator::new().min_params(1).max_params(2);
        let too_few = validator.validate(&message(vec![], vec![])).unwrap_err();
        assert_eq!(too_few.error_type, RpcValidationErrorType::TooFewParameters);

        let too_many = validator
            .validate(&message(vec![1, 2, 3], vec![]))
            .unwrap_err();
        assert_eq!(
            too_many.error_type,
            RpcValidationErrorType::TooManyParameters
        );
    }

    #[test]
    fn string_rules_handle_control_and_unicode() {
        let validator = ParameterValidator::new()
            .rule(ValidationRule::StringLength {
                index: 0,
                max_len: 8,
            })
            .rule(ValidationRule::StringMatches {
                index: 0,
                pattern: StringPattern::NoControlChars,
            });

        assert!(validator.validate(&message(vec![], vec!["héllo"])).is_ok());
        assert!(validator
            .validate(&message(vec![], vec!["tab\there"]))
            .is_err());
        assert!(validator
            .validate(&message(vec![], vec!["way too long string"]))
            .is_err());
        // Zero-filled and empty inputs never panic.
        assert!(validator.validate(&message(vec![0, 0, 0], vec![""])).is_ok());
    }

    #[test]
    fn sensitive_rule_sets_flag() {
        let validator =
            ParameterValidator::new().sensitive_rule(ValidationRule::NumericRange {
                index: 0,
                min: 0,
                max: 1,
            });
        let failure = validator.validate(&message(vec![9], vec![])).unwrap_err();
        assert!(failure.is_security_violation);
    }

    #[test]
    fn sensitive_validator_flags_any_violation() {
        let validator = ParameterValidator::new()
            .security_sensitive()
            .rule(ValidationRule::NumericRange {
                index: 0,
                min: 0,
                max: 1,
            });
        let failure = validator.validate(&message(vec![9], vec![])).unwrap_err();
        assert!(failure.is_security_violation);
    }

    #[test]
    fn validation_is_deterministic() {
        let validator = ParameterValidator::new()
            .min_params(1)
            .rule(ValidationRule::NumericRange {
                index: 0,
                min: 5,
                max: 10,
            });
        let msg = message(vec![3], vec![]);
        assert_eq!(validator.validate(&msg), validator.validate(&msg));
    }
}
