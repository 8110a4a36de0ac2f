// SPDX-FileCopyrightText: 2025 opsweep contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Bit-diagram compiler.
//!
//! A bit-diagram is a pipe-separated list of boxes written most-significant
//! first, e.g. `sf=1|00100010|sh=x|imm12=xxxxxxxxxxxx|Rn=xxxxx|Rd=xxxxx`.
//! Each box is a bare pattern over `{0,1,x}`, a named equality `name=bits`
//! or a named inequality `name!=bits`. Compiling a diagram yields a
//! [`Predicate`]: a conjunction of precomputed shift/mask/value terms.

use std::fmt;

use opsweep_common::ADDRESS_BITS;
use thiserror::Error;

/// Errors from diagram compilation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiagramError {
    #[error("empty box at position {0}")]
    EmptyBox(usize),

    #[error("invalid character {ch:?} in box {box_text:?}")]
    InvalidBit { box_text: String, ch: char },

    #[error("negated box {0:?} contains don't-care bits")]
    WildcardInNegatedBox(String),

    #[error("diagram is {0} bits wide, at most {ADDRESS_BITS} are supported")]
    TooWide(u32),
}

// ---------------------------------------------------------------------------
// Boxes
// ---------------------------------------------------------------------------

/// How a box constrains its bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxKind {
    /// `bits` or `name=bits`.
    Equal,
    /// `name!=bits`.
    NotEqual,
}

/// One parsed box of a diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitBox<'a> {
    pub name: Option<&'a str>,
    pub pattern: &'a str,
    pub kind: BoxKind,
}

impl<'a> BitBox<'a> {
    /// Parse one box. `!=` is recognised before `=`.
    pub fn parse(text: &'a str) -> Self {
        if let Some((name, pattern)) = text.split_once("!=") {
            return Self { name: Some(name), pattern, kind: BoxKind::NotEqual };
        }
        if let Some((name, pattern)) = text.split_once('=') {
            return Self { name: Some(name), pattern, kind: BoxKind::Equal };
        }
        Self { name: None, pattern: text, kind: BoxKind::Equal }
    }

    /// Width in bits.
    pub fn width(&self) -> u32 {
        self.pattern.len() as u32
    }

    /// True when every bit is a don't-care.
    pub fn is_unconstrained(&self) -> bool {
        self.pattern.bytes().all(|b| b == b'x')
    }
}

// ---------------------------------------------------------------------------
// Terms and predicates
// ---------------------------------------------------------------------------

/// One compiled constraint: `((value >> shift) & mask) ==/!= value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Term {
    pub shift: u32,
    pub mask: u32,
    pub value: u32,
    /// Box width, kept for rendering binary literals at their written width.
    pub width: u32,
    pub negated: bool,
}

impl Term {
    #[inline(always)]
    pub fn test(&self, raw: u32) -> bool {
        let field = (raw >> self.shift) & self.mask;
        (field == self.value) != self.negated
    }

    /// Boolean expression over the variable `var`.
    pub fn render(&self, var: &str) -> String {
        let w = self.width as usize;
        format!(
            "(({var} >> {}) & 0b{:0w$b}) {} 0b{:0w$b}",
            self.shift,
            self.mask,
            if self.negated { "!=" } else { "==" },
            self.value,
        )
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render("insn"))
    }
}

/// A compiled diagram: true when every term holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    terms: Box<[Term]>,
}

impl Predicate {
    pub fn new(terms: Vec<Term>) -> Self {
        Self { terms: terms.into_boxed_slice() }
    }

    #[inline]
    pub fn matches(&self, raw: u32) -> bool {
        self.terms.iter().all(|t| t.test(raw))
    }

    /// Terms in the order they were emitted (rightmost box first).
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }
}

impl Predicate {
    /// Conjunction of every term over `var`, or `true` when unconstrained.
    pub fn render(&self, var: &str) -> String {
        if self.terms.is_empty() {
            return "true".to_string();
        }
        self.terms
            .iter()
            .map(|t| format!("({})", t.render(var)))
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render("insn"))
    }
}

/// Result of compiling one diagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledDiagram {
    pub predicate: Predicate,
    /// Sum of all box widths (normally 32).
    pub width: u32,
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// Mask with a 1 for every fixed bit of `pattern`.
fn fixed_mask(pattern: &str) -> u32 {
    pattern
        .bytes()
        .fold(0, |acc, b| (acc << 1) | u32::from(b != b'x'))
}

/// Expected value with don't-cares read as 0.
fn fixed_value(pattern: &str) -> u32 {
    pattern
        .bytes()
        .fold(0, |acc, b| (acc << 1) | u32::from(b == b'1'))
}

fn check_bits(bx: &BitBox<'_>, text: &str) -> Result<(), DiagramError> {
    match bx.pattern.chars().find(|c| !matches!(c, '0' | '1' | 'x')) {
        Some(ch) => Err(DiagramError::InvalidBit { box_text: text.to_string(), ch }),
        None => Ok(()),
    }
}

/// Compile a bit-diagram into a predicate over a 32-bit value.
///
/// Boxes are walked right to left so the rightmost box sits at bit 0.
/// All-`x` boxes add no term but still occupy their width. For `!=` boxes
/// the comparison value is the raw pattern read as binary, so a negated
/// box containing `x` is rejected.
pub fn compile(diagram: &str) -> Result<CompiledDiagram, DiagramError> {
    let boxes: Vec<&str> = diagram.split('|').collect();

    let mut terms = Vec::with_capacity(boxes.len());
    let mut offset: u32 = 0;

    for (pos, text) in boxes.iter().enumerate().rev() {
        let bx = BitBox::parse(text);
        if bx.pattern.is_empty() {
            return Err(DiagramError::EmptyBox(pos));
        }
        check_bits(&bx, text)?;

        let width = bx.width();
        let end = offset.saturating_add(width);
        if end > ADDRESS_BITS {
            let total = boxes.iter().map(|b| BitBox::parse(b).width()).sum();
            return Err(DiagramError::TooWide(total));
        }

        if !bx.is_unconstrained() {
            let mask = fixed_mask(bx.pattern);
            let (value, negated) = match bx.kind {
                BoxKind::Equal => (fixed_value(bx.pattern), false),
                BoxKind::NotEqual => {
                    let raw = u32::from_str_radix(bx.pattern, 2)
                        .map_err(|_| DiagramError::WildcardInNegatedBox(text.to_string()))?;
                    (raw, true)
                }
            };
            terms.push(Term { shift: offset, mask, value, width, negated });
        }

        offset = end;
    }

    Ok(CompiledDiagram {
        predicate: Predicate::new(terms),
        width: offset,
    })
}
