//! Same-document semantic links between generated ranges.

use serde::Serialize;

use super::mapping::{CodeInformation, Span};

/// A semantic link inside one virtual document.
///
/// Both spans are in generated coordinates of the owning document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Teleport {
    pub from: Span,
    pub to: Span,
    pub data: CodeInformation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeleportTable {
    teleports: Vec<Teleport>,
}

impl TeleportTable {
    pub fn new(teleports: Vec<Teleport>) -> Self {
        Self { teleports }
    }

    pub fn is_empty(&self) -> bool {
        self.teleports.is_empty()
    }

    pub fn teleports(&self) -> &[Teleport] {
        &self.teleports
    }

    /// Targets of teleports whose `from` span starts a range at `offset`, in
    /// table order.
    ///
    /// `from` is half-open: an offset right after it belongs to the next
    /// token. An empty `from` matches only at its start.
    pub fn targets_from(
        &self,
        offset: usize,
        filter: impl Fn(&CodeInformation) -> bool,
    ) -> Vec<Span> {
        self.teleports
            .iter()
            .filter(|t| starts_within(&t.from, offset) && filter(&t.data))
            .map(|t| t.to)
            .collect()
    }
}

fn starts_within(from: &Span, offset: usize) -> bool {
    if from.is_empty() {
        offset == from.start
    } else {
        from.start <= offset && offset < from.end
    }
}
