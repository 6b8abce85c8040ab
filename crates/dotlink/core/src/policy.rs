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

//! Declarative policy tables
//!
//! Everything that used to be an inline name comparison in older archiving
//! engines is data here: the runtime-essential seed list, the dump-time
//! forced-preinitialization list, the dynamic-call-site bootstrap allow-list,
//! the adapter name patterns and the static-invoke holder exception. Tables
//! are serde-loadable so embedders can audit and override them.

use crate::pool::CallSiteSpec;
use serde::{Deserialize, Serialize};

/// Family a bootstrap pattern belongs to. String concatenation factories are
/// always safe; lambda-metafactory sites need the functional-interface checks
/// in [`crate::engine::callsite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootstrapKind {
    StringConcat,
    LambdaMetafactory,
}

/// One allow-listed bootstrap method shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapPattern {
    pub class: String,
    pub method: String,
    /// None matches any descriptor.
    pub descriptor: Option<String>,
    pub kind: BootstrapKind,
}

impl BootstrapPattern {
    fn matches(&self, spec: &CallSiteSpec) -> bool {
        self.class == spec.bootstrap_class
            && self.method == spec.bootstrap_method
            && self.descriptor.as_ref().is_none_or(|d| *d == spec.bootstrap_descriptor)
    }
}

/// Opt-in gates for the riskier resolution kinds. Forcing resolution for
/// these can trigger class initialization earlier than an un-archived run
/// would; both default to off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionPolicy {
    pub resolve_static_fields: bool,
    pub resolve_virtual_dispatch: bool,
}

/// The engine's complete policy surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginePolicy {
    /// Classes the runtime resolves during its own bootstrap, before any
    /// archive replay. Seeds the required-by-runtime set.
    pub essential_classes: Vec<String>,

    /// Classes approved for dump-time initialization, provided the runtime
    /// agrees per class.
    pub forced_preinit_classes: Vec<String>,

    /// Bootstrap method shapes eligible for dynamic-call-site archiving.
    pub bootstrap_allow_list: Vec<BootstrapPattern>,

    /// Name prefixes of runtime-generated adapter classes. These are eagerly
    /// resolved in full, and a replay identity mismatch between two variants
    /// of the same adapter is tolerated.
    pub adapter_name_prefixes: Vec<String>,

    /// Classes whose static methods may be resolved from static-invoke
    /// instructions even though static resolution is otherwise excluded.
    pub static_invoke_holders: Vec<String>,

    /// Whether dynamic call sites are archived at all.
    pub archive_call_sites: bool,

    pub resolution: ResolutionPolicy,
}

impl EnginePolicy {
    pub fn is_essential_name(&self, name: &str) -> bool {
        self.essential_classes.iter().any(|n| n == name)
    }

    pub fn is_forced_preinit(&self, name: &str) -> bool {
        self.forced_preinit_classes.iter().any(|n| n == name)
    }

    pub fn is_adapter_class(&self, name: &str) -> bool {
        self.adapter_name_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    pub fn is_static_invoke_holder(&self, name: &str) -> bool {
        self.static_invoke_holders.iter().any(|n| n == name)
    }

    /// Match a call-site specifier against the allow-list.
    pub fn match_bootstrap(&self, spec: &CallSiteSpec) -> Option<BootstrapKind> {
        self.bootstrap_allow_list.iter().find(|p| p.matches(spec)).map(|p| p.kind)
    }
}

impl Default for EnginePolicy {
    fn default() -> Self {
        EnginePolicy {
            essential_classes: vec![
                "core/Object".to_string(),
                "core/Class".to_string(),
                "core/ClassLoader".to_string(),
                "core/String".to_string(),
                "core/Thread".to_string(),
                "core/ThreadGroup".to_string(),
                "core/Throwable".to_string(),
                "core/Error".to_string(),
                "core/Exception".to_string(),
                "core/RuntimeException".to_string(),
                "core/Cloneable".to_string(),
                "core/Serializable".to_string(),
                "invoke/MethodHandle".to_string(),
                "invoke/MethodType".to_string(),
            ],
            forced_preinit_classes: vec![
                "core/Character$CharacterCache".to_string(),
                "invoke/Invokers".to_string(),
                "invoke/Invokers$Holder".to_string(),
                "invoke/MethodHandle".to_string(),
                "invoke/MethodHandleStatics".to_string(),
                "invoke/DelegatingMethodHandle".to_string(),
                "invoke/DelegatingMethodHandle$Holder".to_string(),
                "invoke/LambdaForm".to_string(),
                "invoke/LambdaForm$NamedFunction".to_string(),
                "invoke/ClassSpecializer".to_string(),
                "invoke/DirectMethodHandle".to_string(),
                "invoke/DirectMethodHandle$Holder".to_string(),
                "invoke/Lookup".to_string(),
                "util/HexFormat".to_string(),
            ],
            bootstrap_allow_list: vec![
                BootstrapPattern {
                    class: "invoke/StringConcatFactory".to_string(),
                    method: "makeConcatWithConstants".to_string(),
                    descriptor: None,
                    kind: BootstrapKind::StringConcat,
                },
                BootstrapPattern {
                    class: "invoke/LambdaMetafactory".to_string(),
                    method: "metafactory".to_string(),
                    descriptor: Some(
                        "(Linvoke/Lookup;Lcore/String;Linvoke/MethodType;Linvoke/MethodType;Linvoke/MethodHandle;Linvoke/MethodType;)Linvoke/CallSite;".to_string(),
                    ),
                    kind: BootstrapKind::LambdaMetafactory,
                },
                BootstrapPattern {
                    class: "invoke/LambdaMetafactory".to_string(),
                    method: "altMetafactory".to_string(),
                    descriptor: Some("(Linvoke/Lookup;Lcore/String;Linvoke/MethodType;[Lcore/Object;)Linvoke/CallSite;".to_string()),
                    kind: BootstrapKind::LambdaMetafactory,
                },
            ],
            adapter_name_prefixes: vec![
                "invoke/Invokers$Holder".to_string(),
                "invoke/DirectMethodHandle$Holder".to_string(),
                "invoke/DelegatingMethodHandle$Holder".to_string(),
                "invoke/LambdaForm$MH".to_string(),
            ],
            static_invoke_holders: vec!["invoke/MethodHandle".to_string(), "invoke/MethodHandleNatives".to_string()],
            archive_call_sites: true,
            resolution: ResolutionPolicy::default(),
        }
    }
}
