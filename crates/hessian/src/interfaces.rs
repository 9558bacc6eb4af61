//! The demo service: its models, a typed client and the server-side interface.
//!
//! Type names match the .NET peers, so either side can talk to them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use hessian_core::middleware::{ContextManager, ServiceError};
use hessian_core::value::{Guid, HessianDecimal, UtcMillis, Value};
use hessian_core::{SerDeResult, TypeRegistry};

pub const TEST_CLASS_TYPE: &str = "Hessian.Models.TestClass";
pub const STATUS_TYPE: &str = "Hessian.Models.Status";

/// Delivery status of a test record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename = "Hessian.Models.Status")]
pub enum Status {
    #[default]
    #[serde(rename = "未发送")]
    NotSent,
    #[serde(rename = "已发")]
    Sent,
    #[serde(rename = "签收")]
    Signed,
}

/// A record exercising most well-known types.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename = "Hessian.Models.TestClass")]
pub struct TestClass {
    pub guid: Guid,
    #[serde(rename = "String")]
    pub string: Option<String>,
    #[serde(rename = "Integer")]
    pub integer: Option<i32>,
    #[serde(rename = "Enum")]
    pub status: Status,
    #[serde(rename = "ArrayList")]
    pub array_list: Vec<String>,
    #[serde(rename = "Decimal")]
    pub decimal: Option<HessianDecimal>,
    #[serde(rename = "Float")]
    pub float: f32,
    #[serde(rename = "Double")]
    pub double: f64,
    #[serde(rename = "Long")]
    pub long: i64,
    #[serde(rename = "DateTime")]
    pub date_time: UtcMillis,
}

/// Register the demo models with a registry.
pub fn register_models(registry: &TypeRegistry) -> SerDeResult<()> {
    registry.register_type::<TestClass>(TEST_CLASS_TYPE)?;
    registry.register_enum_type::<Status>(STATUS_TYPE)?;

    Ok(())
}

/// Server side of the demo service.
///
/// Pair an implementation with [service_handler!][crate::service_handler] to serve it.
#[async_trait]
pub trait DemoService {
    /// A fixed greeting.
    async fn hello(&mut self) -> Result<String, ServiceError>;

    /// A batch of sample records.
    async fn test2(&mut self) -> Result<Vec<TestClass>, ServiceError>;

    /// Return the argument as received.
    async fn echo(&mut self, value: Value) -> Result<Value, ServiceError>;

    async fn add(&mut self, a: i32, b: i32) -> Result<i32, ServiceError>;

    /// Always fails with `message`.
    async fn fail(&mut self, message: String) -> Result<(), ServiceError>;
}

/// Typed client for [DemoService].
#[derive(Debug)]
pub struct DemoClient {
    ctx: ContextManager,
}

impl DemoClient {
    pub fn new(ctx: ContextManager) -> Self {
        Self { ctx }
    }

    pub fn context(&mut self) -> &mut ContextManager {
        &mut self.ctx
    }

    pub async fn hello(&mut self) -> SerDeResult<String> {
        self.ctx.call("hello", vec![]).await
    }

    pub async fn test2(&mut self) -> SerDeResult<Vec<TestClass>> {
        self.ctx.call("test2", vec![]).await
    }

    pub async fn echo(&mut self, value: Value) -> SerDeResult<Value> {
        self.ctx.invoke("echo", vec![value]).await
    }

    pub async fn add(&mut self, a: i32, b: i32) -> SerDeResult<i32> {
        self.ctx.call("add", vec![a.into(), b.into()]).await
    }

    pub async fn fail(&mut self, message: &str) -> SerDeResult<()> {
        self.ctx.call("fail", vec![message.into()]).await
    }
}
