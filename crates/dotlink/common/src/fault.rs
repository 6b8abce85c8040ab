// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use thiserror::Error;

/// Recoverable failure raised by a runtime adapter during best-effort
/// resolution. Callers on the dump and replay paths match on the result and
/// drop the fault; nothing in the engine propagates it past the entry that
/// produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveFault {
    #[error("class not found: {name}")]
    ClassNotFound { name: String },

    #[error("field not found: {class}.{name}:{descriptor}")]
    FieldNotFound { class: String, name: String, descriptor: String },

    #[error("method not found: {class}.{name}{descriptor}")]
    MethodNotFound { class: String, name: String, descriptor: String },

    #[error("constant pool entry {index} is marked unresolved-in-error")]
    EntryInError { index: u16 },

    #[error("constant pool entry {index} has unexpected tag: {found}")]
    UnexpectedTag { index: u16, found: &'static str },

    #[error("bootstrap method failed: {reason}")]
    BootstrapFailed { reason: String },

    #[error("class {name} is not in a loadable state: {reason}")]
    NotLoadable { name: String, reason: String },

    #[error("string interning failed: {reason}")]
    InternFailed { reason: String },
}

pub type ResolveResult<T> = Result<T, ResolveFault>;
