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

//! Method bytecode model
//!
//! The engine does not interpret bytecode; it only scans method code for the
//! fixed family of member-access instructions whose operands name
//! constant-pool entries.

pub mod opcode;
pub mod scanner;

pub use opcode::AccessOpcode;
pub use scanner::{AccessSite, CodeError, CodeScanner};
