//! Ohm's-law calculator session.
//!
//! A session knows up to two of voltage (`U`), resistance (`R`) and current
//! (`I`) and derives the third from `U = I * R`. The state machine is pure: the
//! connection handler owns the current [`OhmState`], feeds it one line at a
//! time and writes back whatever [`Step`] says.

pub const OK_REPLY: &str = "OK";
pub const EXIT_REPLY: &str = "Returning to standard mode.";
pub const INSUFFICIENT_REPLY: &str = "Not enough information.";
pub const INVALID_REPLY: &str = "Invalid command.";
pub const DIVISION_BY_ZERO_REPLY: &str = "Cannot divide by zero.";

const EXIT_COMMAND: &str = "ex";

/// One of the three electrical quantities a session can be asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Voltage,
    Resistance,
    Current,
}

impl Quantity {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "U" => Some(Self::Voltage),
            "R" => Some(Self::Resistance),
            "I" => Some(Self::Current),
            _ => None,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Voltage => "U",
            Self::Resistance => "R",
            Self::Current => "I",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Self::Voltage => "V",
            Self::Resistance => "Ω",
            Self::Current => "A",
        }
    }
}

/// What the session currently knows. Values are volts, ohms and amperes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OhmState {
    #[default]
    Unknown,
    KnowsVoltage(f64),
    KnowsResistance(f64),
    KnowsCurrent(f64),
    KnowsVoltageAndResistance { voltage: f64, resistance: f64 },
    KnowsResistanceAndCurrent { resistance: f64, current: f64 },
    KnowsVoltageAndCurrent { voltage: f64, current: f64 },
}

/// Result of feeding one line to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// The session stays open in `state`.
    Continue { state: OhmState, reply: String },
    /// The owner asked to leave calculator mode; the session is gone.
    Exit { reply: String },
}

#[derive(Debug, PartialEq)]
enum Input {
    Exit,
    Assign(Quantity, f64),
    Query(Quantity),
    Invalid,
}

#[derive(Debug)]
enum Unanswerable {
    Insufficient,
    DivisionByZero,
}

impl OhmState {
    pub fn new() -> Self {
        Self::Unknown
    }

    /// Applies one input line. `ex` is recognised in every state before any
    /// other pattern.
    pub fn step(self, line: &str) -> Step {
        match parse_input(line) {
            Input::Exit => Step::Exit {
                reply: EXIT_REPLY.to_string(),
            },
            Input::Assign(quantity, value) => match self.assign(quantity, value) {
                Some(state) => proceed(state, OK_REPLY.to_string()),
                None => proceed(self, INVALID_REPLY.to_string()),
            },
            Input::Query(quantity) => {
                let reply = match self.solve(quantity) {
                    Ok(value) => format_quantity(quantity, value),
                    Err(Unanswerable::Insufficient) => INSUFFICIENT_REPLY.to_string(),
                    Err(Unanswerable::DivisionByZero) => DIVISION_BY_ZERO_REPLY.to_string(),
                };
                proceed(self, reply)
            }
            Input::Invalid => proceed(self, INVALID_REPLY.to_string()),
        }
    }

    /// Known `(voltage, resistance, current)`.
    fn known(self) -> (Option<f64>, Option<f64>, Option<f64>) {
        match self {
            Self::Unknown => (None, None, None),
            Self::KnowsVoltage(voltage) => (Some(voltage), None, None),
            Self::KnowsResistance(resistance) => (None, Some(resistance), None),
            Self::KnowsCurrent(current) => (None, None, Some(current)),
            Self::KnowsVoltageAndResistance {
                voltage,
                resistance,
            } => (Some(voltage), Some(resistance), None),
            Self::KnowsResistanceAndCurrent {
                resistance,
                current,
            } => (None, Some(resistance), Some(current)),
            Self::KnowsVoltageAndCurrent { voltage, current } => {
                (Some(voltage), None, Some(current))
            }
        }
    }

    /// `None` when the quantity is already known or two values are already
    /// held; a stored value is never overwritten.
    fn assign(self, quantity: Quantity, value: f64) -> Option<Self> {
        use Quantity::{Current, Resistance, Voltage};

        match (self, quantity) {
            (Self::Unknown, Voltage) => Some(Self::KnowsVoltage(value)),
            (Self::Unknown, Resistance) => Some(Self::KnowsResistance(value)),
            (Self::Unknown, Current) => Some(Self::KnowsCurrent(value)),
            (Self::KnowsVoltage(voltage), Resistance) => Some(Self::KnowsVoltageAndResistance {
                voltage,
                resistance: value,
            }),
            (Self::KnowsVoltage(voltage), Current) => Some(Self::KnowsVoltageAndCurrent {
                voltage,
                current: value,
            }),
            (Self::KnowsResistance(resistance), Voltage) => {
                Some(Self::KnowsVoltageAndResistance {
                    voltage: value,
                    resistance,
                })
            }
            (Self::KnowsResistance(resistance), Current) => {
                Some(Self::KnowsResistanceAndCurrent {
                    resistance,
                    current: value,
                })
            }
            (Self::KnowsCurrent(current), Voltage) => Some(Self::KnowsVoltageAndCurrent {
                voltage: value,
                current,
            }),
            (Self::KnowsCurrent(current), Resistance) => Some(Self::KnowsResistanceAndCurrent {
                resistance: value,
                current,
            }),
            _ => None,
        }
    }

    fn solve(self, quantity: Quantity) -> Result<f64, Unanswerable> {
        let (voltage, resistance, current) = self.known();
        match quantity {
            Quantity::Voltage => match (voltage, resistance, current) {
                (Some(voltage), _, _) => Ok(voltage),
                (None, Some(resistance), Some(current)) => Ok(resistance * current),
                _ => Err(Unanswerable::Insufficient),
            },
            Quantity::Resistance => match (voltage, resistance, current) {
                (_, Some(resistance), _) => Ok(resistance),
                (Some(voltage), None, Some(current)) => divide(voltage, current),
                _ => Err(Unanswerable::Insufficient),
            },
            Quantity::Current => match (voltage, resistance, current) {
                (_, _, Some(current)) => Ok(current),
                (Some(voltage), Some(resistance), None) => divide(voltage, resistance),
                _ => Err(Unanswerable::Insufficient),
            },
        }
    }
}

fn proceed(state: OhmState, reply: String) -> Step {
    Step::Continue { state, reply }
}

fn divide(numerator: f64, denominator: f64) -> Result<f64, Unanswerable> {
    if denominator == 0.0 {
        return Err(Unanswerable::DivisionByZero);
    }
    Ok(numerator / denominator)
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line == EXIT_COMMAND {
        return Input::Exit;
    }

    let Some((key, value)) = line.split_once('=') else {
        return Input::Invalid;
    };
    if value.contains('=') {
        return Input::Invalid;
    }
    let Some(quantity) = Quantity::from_key(key) else {
        return Input::Invalid;
    };

    let value = value.trim();
    if value == "?" {
        return Input::Query(quantity);
    }

    match parse_value(value) {
        Some(value) => Input::Assign(quantity, value),
        None => Input::Invalid,
    }
}

/// Parses a decimal number where a trailing `k` or `m` stands in for the
/// exponent (`1k` is `1e3`, `5m` is `5e-3`).
fn parse_value(raw: &str) -> Option<f64> {
    let expanded = if let Some(mantissa) = raw.strip_suffix('k') {
        format!("{mantissa}e3")
    } else if let Some(mantissa) = raw.strip_suffix('m') {
        format!("{mantissa}e-3")
    } else {
        raw.to_string()
    };

    let value: f64 = expanded.parse().ok()?;
    value.is_finite().then_some(value)
}

/// Plain decimal with the shortest round-trip digits and always a fractional
/// part: `5.0`, `0.005`, `0.0000005`, never exponent notation.
fn format_quantity(quantity: Quantity, value: f64) -> String {
    let mut digits = value.to_string();
    if value.is_finite() && !digits.contains('.') {
        digits.push_str(".0");
    }
    format!("{}={digits}{}", quantity.key(), quantity.unit())
}
