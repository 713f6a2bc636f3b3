//! 能力参数 Schema 生成
//!
//! 参数分四类：基本类型、具备能力的对象（以缓存引用字符串传递）、可空对象、对象列表 / 映射。
//! 对象参数的 Schema 是带引用格式提示的字符串，调用前由缓存解析为实际对象。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde::Serialize;
use serde_json::{json, Value as Json};

use crate::capability::{ParamSpec, ParamType, Registry};

/// 参数分类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bearing {
    Primitive,
    Object,
    OptionalObject,
    ObjectList,
    ObjectMap,
}

/// 按注册表判断参数类别；未注册的对象类型按基本类型处理
pub fn classify(ty: &ParamType, registry: &Registry) -> Bearing {
    let is_cap = |t: &ParamType| matches!(t, ParamType::Object(name) if registry.is_capability_type(name));
    match ty {
        t if is_cap(t) => Bearing::Object,
        ParamType::Optional(inner) if is_cap(inner.as_ref()) => Bearing::OptionalObject,
        ParamType::List(inner) if is_cap(inner.as_ref()) => Bearing::ObjectList,
        ParamType::Map(inner) if is_cap(inner.as_ref()) => Bearing::ObjectMap,
        _ => Bearing::Primitive,
    }
}

/// 对象引用提示：`_USER_<ID>`
pub fn reference_hint(type_name: &str) -> String {
    format!(
        "Reference to a cached {type_name} object, formatted as _{}_<ID>",
        type_name.to_uppercase()
    )
}

fn object_name(ty: &ParamType) -> &str {
    match ty {
        ParamType::Object(name) => name,
        ParamType::Optional(inner) | ParamType::List(inner) | ParamType::Map(inner) => {
            object_name(inner)
        }
        _ => "object",
    }
}

fn primitive_schema(ty: &ParamType) -> Json {
    match ty {
        ParamType::String => json!({ "type": "string" }),
        ParamType::Integer => json!({ "type": "integer" }),
        ParamType::Number => json!({ "type": "number" }),
        ParamType::Boolean => json!({ "type": "boolean" }),
        ParamType::Optional(inner) => {
            let mut schema = primitive_schema(inner);
            if let Some(t) = schema.get("type").cloned() {
                schema["type"] = json!([t, "null"]);
            }
            schema
        }
        ParamType::List(inner) => json!({ "type": "array", "items": primitive_schema(inner) }),
        ParamType::Map(inner) => {
            json!({ "type": "object", "additionalProperties": primitive_schema(inner) })
        }
        ParamType::Any | ParamType::Object(_) => json!({}),
    }
}

/// 单个参数的 Schema
pub fn param_schema(param: &ParamSpec, registry: &Registry) -> Json {
    let reference = || {
        json!({ "type": "string", "description": reference_hint(object_name(&param.ty)) })
    };
    match classify(&param.ty, registry) {
        Bearing::Primitive => primitive_schema(&param.ty),
        Bearing::Object => reference(),
        Bearing::OptionalObject => json!({
            "type": ["string", "null"],
            "description": reference_hint(object_name(&param.ty)),
        }),
        Bearing::ObjectList => json!({ "type": "array", "items": reference() }),
        Bearing::ObjectMap => json!({ "type": "object", "additionalProperties": reference() }),
    }
}

/// 整个方法的参数 Schema（JSON Schema object）
pub fn args_schema(params: &[ParamSpec], registry: &Registry) -> Json {
    let properties: serde_json::Map<String, Json> = params
        .iter()
        .map(|p| (p.name.clone(), param_schema(p, registry)))
        .collect();
    let required: Vec<&str> = params
        .iter()
        .filter(|p| !p.optional && !matches!(p.ty, ParamType::Optional(_)))
        .map(|p| p.name.as_str())
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// 不支持原生工具调用的模型所用的调用格式：`{"tool": "...", "args": {...}}`
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 能力名
    pub tool: String,
    /// 能力参数；对象参数以缓存引用字符串传递
    pub args: HashMap<String, serde_json::Value>,
}

/// 调用格式的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
