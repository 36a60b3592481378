// src/buffer.rs

//! Pending change buffer for a protocol-level notify request.
//!
//! A client's change-notify request carries the size of the response buffer
//! it is prepared to receive. Events routed to the request accumulate here
//! until the protocol layer answers; each event costs a fixed header plus
//! its name in UTF-16, padded to four bytes. Once the budget is exceeded, or
//! the source overflowed, individual changes are useless and the client is
//! told to re-enumerate the directory instead.
//!
//! A handle whose first answered request had to be collapsed never recovers:
//! every later request on it is answered with
//! [`ChangeBatch::EnumerateDirectory`] as well, whatever its budget. A
//! collapse on a later request only affects that request.

use std::mem;

use crate::errors::{NotifyError, Result};
use crate::types::{Action, NotifyEvent};

/// Largest response budget a client may ask for.
pub const MAX_CHANGE_BUFFER: usize = 0x8_0000;

const ENTRY_HEADER: usize = 12;

/// What the protocol layer sends back for a pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeBatch {
    Changes(Vec<NotifyEvent>),
    /// Changes were lost or did not fit; the client must re-enumerate.
    EnumerateDirectory,
}

#[derive(Debug, Clone)]
pub struct PendingChanges {
    budget: usize,
    used: usize,
    events: Vec<NotifyEvent>,
    collapsed: bool,
    answered: bool,
    always_enumerate: bool,
}

impl PendingChanges {
    pub fn new(budget: usize) -> Result<Self> {
        check_budget(budget)?;
        Ok(Self {
            budget,
            used: 0,
            events: Vec::new(),
            collapsed: false,
            answered: false,
            always_enumerate: false,
        })
    }

    /// Budget of the next request on the same handle.
    ///
    /// Events already buffered that no longer fit collapse the request.
    pub fn set_budget(&mut self, budget: usize) -> Result<()> {
        check_budget(budget)?;
        self.budget = budget;
        if self.used > budget {
            self.collapse();
        }
        Ok(())
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Whether every request on this handle is answered by re-enumeration.
    pub fn always_enumerates(&self) -> bool {
        self.always_enumerate
    }

    /// Bytes one event occupies in a response.
    pub fn encoded_len(event: &NotifyEvent) -> usize {
        let name = event.path.encode_utf16().count() * 2;
        (ENTRY_HEADER + name + 3) & !3
    }

    pub fn push(&mut self, event: NotifyEvent) {
        if self.collapsed {
            return;
        }
        if self.always_enumerate || event.action == Action::Overflow {
            self.collapse();
            return;
        }

        let len = Self::encoded_len(&event);
        if self.used + len > self.budget {
            self.collapse();
            return;
        }
        self.used += len;
        self.events.push(event);
    }

    fn collapse(&mut self) {
        self.collapsed = true;
        self.events.clear();
        self.used = 0;
    }

    pub fn is_empty(&self) -> bool {
        !self.collapsed && self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Hand the buffered result to the protocol layer and start over with
    /// the same budget.
    pub fn take(&mut self) -> ChangeBatch {
        let collapsed =
            mem::replace(&mut self.collapsed, false) || self.budget == 0 || self.always_enumerate;
        let events = mem::take(&mut self.events);
        self.used = 0;

        if collapsed && !self.answered {
            self.always_enumerate = true;
        }
        self.answered = true;

        if collapsed {
            ChangeBatch::EnumerateDirectory
        } else {
            ChangeBatch::Changes(events)
        }
    }

    /// Set the budget of the next request, then answer it.
    pub fn take_with_budget(&mut self, budget: usize) -> Result<ChangeBatch> {
        self.set_budget(budget)?;
        Ok(self.take())
    }
}

fn check_budget(budget: usize) -> Result<()> {
    if budget > MAX_CHANGE_BUFFER {
        return Err(NotifyError::Config(format!(
            "change buffer of {budget} bytes exceeds the {MAX_CHANGE_BUFFER} byte maximum"
        )));
    }
    Ok(())
}
