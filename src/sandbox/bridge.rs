//! Value ↔ rhai::Dynamic 转换；领域对象以 `ObjectRef` 自定义类型进入脚本

use rhai::{Array, Dynamic, Engine, ImmutableString, Map};

use crate::cache::{render, ObjectRef, Value};

/// 脚本中对象的类型名
pub const OBJECT_TYPE_NAME: &str = "DomainObject";

pub fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Int(i) => Dynamic::from(*i),
        Value::Float(f) => Dynamic::from(*f),
        Value::Str(s) => Dynamic::from(s.clone()),
        Value::List(items) => Dynamic::from_array(items.iter().map(to_dynamic).collect()),
        Value::Map(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.as_str().into(), to_dynamic(v));
            }
            Dynamic::from_map(out)
        }
        Value::Object(obj) => Dynamic::from(obj.clone()),
    }
}

pub fn from_dynamic(value: Dynamic) -> Value {
    if value.is_unit() {
        return Value::Null;
    }
    if let Ok(b) = value.as_bool() {
        return Value::Bool(b);
    }
    if let Ok(i) = value.as_int() {
        return Value::Int(i);
    }
    if let Ok(f) = value.as_float() {
        return Value::Float(f);
    }
    if let Ok(c) = value.as_char() {
        return Value::Str(c.to_string());
    }
    if value.is_string() {
        return Value::Str(value.into_string().unwrap_or_default());
    }
    if value.is_array() {
        let items = value.try_cast::<Array>().unwrap_or_default();
        return Value::List(items.into_iter().map(from_dynamic).collect());
    }
    if value.is_map() {
        let map = value.try_cast::<Map>().unwrap_or_default();
        return Value::Map(
            map.into_iter()
                .map(|(k, v)| (k.to_string(), from_dynamic(v)))
                .collect(),
        );
    }
    if value.is::<ObjectRef>() {
        if let Some(obj) = value.try_cast::<ObjectRef>() {
            return Value::Object(obj);
        }
        return Value::Null;
    }
    Value::Str(value.to_string())
}

/// 注册对象类型：字段索引（同时作为属性访问的回退）、打印与类型名
pub fn register_object_type(engine: &mut Engine) {
    engine.register_type_with_name::<ObjectRef>(OBJECT_TYPE_NAME);
    engine.register_indexer_get(|obj: &mut ObjectRef, field: ImmutableString| -> Dynamic {
        obj.field(field.as_str())
            .map(|v| to_dynamic(&v))
            .unwrap_or(Dynamic::UNIT)
    });
    engine.register_fn("to_string", |obj: &mut ObjectRef| -> String {
        render::minimal(&Value::Object(obj.clone()))
            .as_str()
            .map(String::from)
            .unwrap_or_default()
    });
    engine.register_fn("to_debug", |obj: &mut ObjectRef| -> String {
        render::extended(&Value::Object(obj.clone())).to_string()
    });
    engine.register_fn("type_name", |obj: &mut ObjectRef| -> String {
        obj.type_name().to_string()
    });
}
