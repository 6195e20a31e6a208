//! 命令参数 JSON Schema 生成（schemars schema 模型）
//!
//! 由 ParamSpec 声明生成，作为目录中的 parameters 提供给模型。

use schemars::schema::{
    ArrayValidation, InstanceType, Metadata, ObjectValidation, Schema, SchemaObject, SingleOrVec,
};

use crate::tools::registry::ParamSpec;
use crate::tools::value::ParamKind;

fn param_schema(spec: &ParamSpec) -> Schema {
    let mut schema = SchemaObject {
        metadata: Some(Box::new(Metadata {
            description: Some(spec.description.to_string()),
            ..Default::default()
        })),
        ..Default::default()
    };

    match spec.kind {
        ParamKind::Text => schema.instance_type = Some(InstanceType::String.into()),
        ParamKind::Number => schema.instance_type = Some(InstanceType::Number.into()),
        // 模型常把 ID 当字符串传，两种都接受
        ParamKind::TaskId => {
            schema.instance_type = Some(SingleOrVec::Vec(vec![
                InstanceType::String,
                InstanceType::Integer,
            ]))
        }
        ParamKind::TaskIdList => {
            schema.instance_type = Some(InstanceType::Array.into());
            schema.array = Some(Box::new(ArrayValidation {
                items: Some(SingleOrVec::Single(Box::new(Schema::Object(SchemaObject {
                    instance_type: Some(InstanceType::Number.into()),
                    ..Default::default()
                })))),
                ..Default::default()
            }));
        }
    }

    if !spec.allowed.is_empty() {
        schema.enum_values = Some(
            spec.allowed
                .iter()
                .map(|v| serde_json::Value::String((*v).to_string()))
                .collect(),
        );
    }

    Schema::Object(schema)
}

/// 参数声明 -> object schema
pub fn parameters_schema(params: &[ParamSpec]) -> serde_json::Value {
    let mut object = ObjectValidation::default();
    for spec in params {
        object
            .properties
            .insert(spec.name.to_string(), param_schema(spec));
        if spec.required {
            object.required.insert(spec.name.to_string());
        }
    }
    let root = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        object: Some(Box::new(object)),
        ..Default::default()
    };
    serde_json::to_value(&root).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_schema_shape() {
        let params = [
            ParamSpec::required("task_id", ParamKind::TaskId, "任务ID"),
            ParamSpec::optional("dependencies", ParamKind::TaskIdList, "依赖"),
            ParamSpec::optional("status", ParamKind::Text, "状态").with_allowed(&["pending"]),
        ];
        let schema = parameters_schema(&params);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], serde_json::json!(["task_id"]));
        assert_eq!(schema["properties"]["dependencies"]["type"], "array");
        assert_eq!(schema["properties"]["dependencies"]["items"]["type"], "number");
        assert_eq!(schema["properties"]["status"]["enum"], serde_json::json!(["pending"]));
        assert_eq!(schema["properties"]["task_id"]["description"], "任务ID");
    }
}
