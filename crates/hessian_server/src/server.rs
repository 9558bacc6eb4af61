//! Server definition and implementations

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use hessian::interfaces::{DemoService, Status, TestClass};
use hessian::middleware::ServiceError;
use hessian::service_handler;
use hessian::value::{Guid, HessianDecimal, UtcMillis, Value};

#[derive(Debug, Default)]
pub struct DemoServer {
    /// Number of calls served, failures included
    pub calls: u64,
}

#[async_trait]
impl DemoService for DemoServer {
    async fn hello(&mut self) -> Result<String, ServiceError> {
        self.calls += 1;
        Ok("Hello World".to_string())
    }

    async fn test2(&mut self) -> Result<Vec<TestClass>, ServiceError> {
        self.calls += 1;

        let now = UtcMillis::now();
        let records = [Status::NotSent, Status::Sent, Status::Signed]
            .into_iter()
            .enumerate()
            .map(|(i, status)| TestClass {
                guid: Guid(Uuid::new_v4()),
                string: Some(format!("record {}", i)),
                integer: (i % 2 == 0).then_some(i as i32),
                status,
                array_list: (0..i).map(|n| n.to_string()).collect(),
                decimal: Some(HessianDecimal(Decimal::new(1000 + i as i64, 2))),
                float: i as f32 / 2.0,
                double: i as f64 * 1.25,
                long: i64::MAX - i as i64,
                date_time: now,
            })
            .collect();

        Ok(records)
    }

    async fn echo(&mut self, value: Value) -> Result<Value, ServiceError> {
        self.calls += 1;
        log::debug!("echo {}", value);
        Ok(value)
    }

    async fn add(&mut self, a: i32, b: i32) -> Result<i32, ServiceError> {
        self.calls += 1;
        a.checked_add(b)
            .ok_or_else(|| ServiceError::raise(format!("{} + {} overflows", a, b)))
    }

    async fn fail(&mut self, message: String) -> Result<(), ServiceError> {
        self.calls += 1;
        Err(ServiceError::raise(message))
    }
}

service_handler! {
    DemoServer,
    "hello" => hello(),
    "test2" => test2(),
    "echo" => echo(value: Value),
    "add" => add(a: i32, b: i32),
    "fail" => fail(message: String),
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use hessian::envelope::{self, Call, Reply, Version};
    use hessian::interfaces::register_models;
    use hessian::middleware::Skeleton;
    use hessian::ser_de::{from_value, FaultKind};
    use hessian::TypeRegistry;

    fn registry() -> Arc<TypeRegistry> {
        let registry = Arc::new(TypeRegistry::new());
        register_models(&registry).unwrap();
        registry
    }

    async fn round_trip(
        skeleton: &Skeleton<DemoServer>,
        version: Version,
        call: Call,
    ) -> Reply {
        let registry = registry();
        let frame = envelope::encode_call(version, &call, registry.clone()).unwrap();
        let resp = skeleton.handle_frame(&frame).await.unwrap();

        envelope::decode_reply(version, &resp, registry).unwrap()
    }

    #[tokio::test]
    async fn test_demo_methods() {
        let skeleton = Skeleton::with_registry(DemoServer::default(), registry());

        for version in [Version::Hessian1, Version::Hessian2] {
            let hello = round_trip(&skeleton, version, Call::new("hello", vec![])).await;
            assert_eq!(hello.into_result().unwrap(), Value::from("Hello World"));

            let records = round_trip(&skeleton, version, Call::new("test2", vec![])).await;
            let records: Vec<TestClass> = from_value(records.into_result().unwrap()).unwrap();
            assert_eq!(records.len(), 3);
            assert_eq!(records[1].status, Status::Sent);
            assert_eq!(records[2].array_list, vec!["0", "1"]);

            let sum = round_trip(
                &skeleton,
                version,
                Call::new("add__2", vec![Value::Int(7), Value::Int(8)]),
            )
            .await;
            assert_eq!(sum.into_result().unwrap(), Value::Int(15));
        }

        assert_eq!(skeleton.handler().await.calls, 6);
    }

    #[tokio::test]
    async fn test_demo_faults() {
        let skeleton = Skeleton::with_registry(DemoServer::default(), registry());

        let reply = round_trip(
            &skeleton,
            Version::Hessian2,
            Call::new("add", vec![Value::Int(i32::MAX), Value::Int(1)]),
        )
        .await;
        match reply {
            Reply::Fault(f) => {
                assert_eq!(f.kind(), FaultKind::Service);
                assert_eq!(f.message, "2147483647 + 1 overflows");
            }
            Reply::Value(v) => panic!("expected fault, got {:?}", v),
        }

        let reply = round_trip(
            &skeleton,
            Version::Hessian1,
            Call::new("fail", vec![Value::from("<nope>")]),
        )
        .await;
        match reply {
            Reply::Fault(f) => {
                assert_eq!(f.kind(), FaultKind::Service);
                assert_eq!(f.message, "&lt;nope&gt;");
            }
            Reply::Value(v) => panic!("expected fault, got {:?}", v),
        }
    }
}
