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

//! Member Access Opcodes
//!
//! The allow-list of instructions the prelinker is willing to look at. Every
//! opcode in this family is followed by a little-endian u16 constant-pool
//! index. Opcodes below 0x20 are plain stack/arithmetic/control instructions
//! with no pool operand and are skipped by the scanner.

use crate::pool::DispatchKind;

/// Lowest opcode value carrying a constant-pool operand.
pub const MEMBER_OPCODE_BASE: u8 = 0x20;

/// Field access and invocation opcodes subject to prelinking.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AccessOpcode {
    /// Read an instance field
    /// Operand: pool_index (u16)
    GetField = 0x20,

    /// Write an instance field
    PutField = 0x21,

    /// Read a static field
    GetStatic = 0x22,

    /// Write a static field
    PutStatic = 0x23,

    /// Invoke with virtual dispatch
    InvokeVirtual = 0x30,

    /// Invoke through an interface
    InvokeInterface = 0x31,

    /// Invoke a constructor or private/super method
    InvokeSpecial = 0x32,

    /// Invoke a static method
    InvokeStatic = 0x33,

    /// Invoke through a method handle
    InvokeHandle = 0x34,

    /// Invoke a dynamic call site
    InvokeDynamic = 0x35,
}

impl AccessOpcode {
    /// Convert a numerical value back to an AccessOpcode.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x20 => Some(Self::GetField),
            0x21 => Some(Self::PutField),
            0x22 => Some(Self::GetStatic),
            0x23 => Some(Self::PutStatic),
            0x30 => Some(Self::InvokeVirtual),
            0x31 => Some(Self::InvokeInterface),
            0x32 => Some(Self::InvokeSpecial),
            0x33 => Some(Self::InvokeStatic),
            0x34 => Some(Self::InvokeHandle),
            0x35 => Some(Self::InvokeDynamic),
            _ => None,
        }
    }

    /// Get the opcode's numerical value.
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from mnemonic string to opcode.
    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        match mnemonic.to_uppercase().as_str() {
            "GET_FIELD" => Some(Self::GetField),
            "PUT_FIELD" => Some(Self::PutField),
            "GET_STATIC" => Some(Self::GetStatic),
            "PUT_STATIC" => Some(Self::PutStatic),
            "INVOKE_VIRTUAL" => Some(Self::InvokeVirtual),
            "INVOKE_INTERFACE" => Some(Self::InvokeInterface),
            "INVOKE_SPECIAL" => Some(Self::InvokeSpecial),
            "INVOKE_STATIC" => Some(Self::InvokeStatic),
            "INVOKE_HANDLE" => Some(Self::InvokeHandle),
            "INVOKE_DYNAMIC" => Some(Self::InvokeDynamic),
            _ => None,
        }
    }

    /// Convert opcode to mnemonic string.
    pub fn to_mnemonic(&self) -> &'static str {
        match self {
            Self::GetField => "GET_FIELD",
            Self::PutField => "PUT_FIELD",
            Self::GetStatic => "GET_STATIC",
            Self::PutStatic => "PUT_STATIC",
            Self::InvokeVirtual => "INVOKE_VIRTUAL",
            Self::InvokeInterface => "INVOKE_INTERFACE",
            Self::InvokeSpecial => "INVOKE_SPECIAL",
            Self::InvokeStatic => "INVOKE_STATIC",
            Self::InvokeHandle => "INVOKE_HANDLE",
            Self::InvokeDynamic => "INVOKE_DYNAMIC",
        }
    }

    /// True for field read/write opcodes.
    pub fn is_field_access(&self) -> bool {
        matches!(self, Self::GetField | Self::PutField | Self::GetStatic | Self::PutStatic)
    }

    /// True for the static-field pair.
    pub fn is_static_field_access(&self) -> bool {
        matches!(self, Self::GetStatic | Self::PutStatic)
    }

    /// Dispatch kind of an invocation opcode; None for field access and
    /// dynamic call sites (which resolve through the bootstrap path).
    pub fn dispatch_kind(&self) -> Option<DispatchKind> {
        match self {
            Self::InvokeVirtual => Some(DispatchKind::Virtual),
            Self::InvokeInterface => Some(DispatchKind::Interface),
            Self::InvokeSpecial => Some(DispatchKind::Special),
            Self::InvokeStatic => Some(DispatchKind::Static),
            Self::InvokeHandle => Some(DispatchKind::Handle),
            _ => None,
        }
    }
}
