//! Left-to-right integer expressions used inside template placeholders.
//!
//! `"$ADDRESS + 1 / 2"` hands the evaluator `["+", "1", "/", "2"]` with the
//! property value as seed. Tokens alternate operator / operand; there is no
//! precedence. An unknown operator ends the expression so trailing template
//! text survives.

use crate::error::SubstitutionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl Operation {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "+" => Some(Operation::Add),
            "-" => Some(Operation::Sub),
            "*" => Some(Operation::Mul),
            "/" => Some(Operation::Div),
            "%" => Some(Operation::Mod),
            _ => None,
        }
    }

    fn symbol(self) -> char {
        match self {
            Operation::Add => '+',
            Operation::Sub => '-',
            Operation::Mul => '*',
            Operation::Div => '/',
            Operation::Mod => '%',
        }
    }

    pub fn apply(self, lhs: i64, rhs: i64) -> Result<i64, SubstitutionError> {
        let overflow = || SubstitutionError::Overflow { lhs, op: self.symbol(), rhs };
        match self {
            Operation::Add => lhs.checked_add(rhs).ok_or_else(overflow),
            Operation::Sub => lhs.checked_sub(rhs).ok_or_else(overflow),
            Operation::Mul => lhs.checked_mul(rhs).ok_or_else(overflow),
            Operation::Div if rhs == 0 => Err(SubstitutionError::DivisionByZero),
            Operation::Div => lhs.checked_div(rhs).ok_or_else(overflow),
            Operation::Mod if rhs == 0 => Err(SubstitutionError::ModuloByZero),
            Operation::Mod => lhs.checked_rem(rhs).ok_or_else(overflow),
        }
    }
}

/// Outcome of [`evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub value: i64,
    /// Number of leading tokens that belong to the expression.
    pub consumed: usize,
    /// Operand tokens that were not integer literals and were skipped.
    pub skipped: Vec<String>,
}

/// Evaluate `tokens` strictly left to right starting from `seed`.
pub fn evaluate<S: AsRef<str>>(seed: i64, tokens: &[S]) -> Result<Evaluation, SubstitutionError> {
    let mut value = seed;
    let mut expect_operator = true;
    let mut pending = Operation::Add;
    let mut skipped = Vec::new();
    let mut consumed = 0;

    for token in tokens {
        let token = token.as_ref();
        if expect_operator {
            let Some(op) = Operation::parse(token) else {
                break;
            };
            pending = op;
        } else {
            let Ok(operand) = token.parse::<i64>() else {
                // Still waiting for an operand; the accumulated value is untouched.
                skipped.push(token.to_string());
                consumed += 1;
                continue;
            };
            value = pending.apply(value, operand)?;
        }
        expect_operator = !expect_operator;
        consumed += 1;
    }

    Ok(Evaluation { value, consumed, skipped })
}
