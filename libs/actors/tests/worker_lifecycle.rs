//! Spawn, call, fail, dispose

use once_cell::sync::Lazy;
use spindle::{
    async_trait, remote_interface, Args, Blueprint, Fault, Fields, HandleState, Marshal,
    MarshalObject, Registry, SpindleError, Value, WorkerHandle, WorkerOptions,
};
use spindle_codec::{object_eq, SharedWord};
use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
struct Point {
    x: i64,
    y: i64,
}

impl MarshalObject for Point {
    fn into_fields(self: Box<Self>) -> spindle_codec::Result<Fields> {
        Ok(Fields::new().with("x", self.x).with("y", self.y))
    }

    fn eq_object(&self, other: &dyn MarshalObject) -> bool {
        object_eq(self, other)
    }
}

impl Marshal for Point {
    fn from_fields(mut fields: Fields) -> spindle_codec::Result<Self> {
        Ok(Point {
            x: fields.take("x", "Point")?,
            y: fields.take("y", "Point")?,
        })
    }
}

/// Never registered, so it crosses as a plain record
#[derive(Debug)]
struct Label {
    text: String,
}

impl MarshalObject for Label {
    fn into_fields(self: Box<Self>) -> spindle_codec::Result<Fields> {
        Ok(Fields::new().with("text", self.text))
    }
}

struct Calculator {
    disposed: SharedWord,
    calls: Cell<i64>,
}

#[async_trait(?Send)]
impl Blueprint for Calculator {
    fn construct(mut args: Args) -> Result<Self, Fault> {
        Ok(Calculator {
            disposed: args.take(0)?,
            calls: Cell::new(0),
        })
    }

    async fn invoke(&self, method: &str, mut args: Args) -> Result<Value, Fault> {
        self.calls.set(self.calls.get() + 1);
        match method {
            "add" => Ok(Value::from(args.take::<i64>(0)? + args.take::<i64>(1)?)),
            "midpoint" => {
                let a: Point = args.take_object(0)?;
                let b: Point = args.take_object(1)?;
                Ok(Value::object(Point {
                    x: (a.x + b.x) / 2,
                    y: (a.y + b.y) / 2,
                }))
            }
            "label" => Ok(Value::object(Label {
                text: args.take(0)?,
            })),
            "fail" => Err(Fault::Raised(Value::Record(
                Fields::new().with("reason", args.take::<String>(0)?),
            ))),
            "sleep" => {
                let millis: u64 = args.take(0)?;
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(Value::from(millis as i64))
            }
            "calls" => Ok(Value::from(self.calls.get())),
            other => Err(Fault::NotFound(other.to_string())),
        }
    }

    async fn dispose(&self) {
        self.disposed.store(1);
    }
}

remote_interface! {
    struct CalculatorClient for Calculator {
        fn add(a: i64, b: i64) -> i64;
        fn midpoint(a: Value, b: Value) -> Value;
        fn label(text: &str) -> Value;
        fn fail(reason: &str) -> ();
        fn sleep(millis: i64) -> i64;
        fn calls() -> i64;
    }
}

/// Spawns its own calculator from inside a worker
struct Relay {
    child: WorkerHandle,
}

#[async_trait(?Send)]
impl Blueprint for Relay {
    fn construct(_: Args) -> Result<Self, Fault> {
        let child = WorkerHandle::spawn::<Calculator>(vec![Value::from(SharedWord::new(0))])?;
        Ok(Relay { child })
    }

    async fn invoke(&self, method: &str, args: Args) -> Result<Value, Fault> {
        match method {
            "add" => Ok(self.child.execute("add", args.into_values()).await?),
            other => Err(Fault::NotFound(other.to_string())),
        }
    }

    async fn dispose(&self) {
        if let Err(err) = self.child.dispose().await {
            tracing::warn!(error = %err, "Child calculator did not dispose cleanly");
        }
    }
}

struct NeverRegistered;

#[async_trait(?Send)]
impl Blueprint for NeverRegistered {
    fn construct(_: Args) -> Result<Self, Fault> {
        Ok(NeverRegistered)
    }

    async fn invoke(&self, _: &str, _: Args) -> Result<Value, Fault> {
        Ok(Value::Null)
    }
}

static REGISTRY: Lazy<Arc<Registry>> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let mut builder = Registry::builder();
    builder
        .marshal::<Point>()
        .and_then(|builder| builder.worker::<Calculator>())
        .and_then(|builder| builder.worker::<Relay>())
        .expect("test registrations are unique");
    builder.install().expect("registry installs once")
});

fn calculator() -> (CalculatorClient, SharedWord) {
    Lazy::force(&REGISTRY);
    let disposed = SharedWord::new(0);
    let client = CalculatorClient::spawn(vec![Value::from(disposed.clone())]).unwrap();
    (client, disposed)
}

#[tokio::test]
async fn test_call_and_dispose() {
    let (calculator, disposed) = calculator();
    assert_eq!(calculator.handle().state(), HandleState::Ready);

    assert_eq!(calculator.add(2, 40).await.unwrap(), 42);
    assert_eq!(calculator.add(-1, 1).await.unwrap(), 0);
    assert_eq!(calculator.calls().await.unwrap(), 3);

    calculator.dispose().await.unwrap();
    assert_eq!(disposed.load(), 1);
    assert_eq!(calculator.handle().state(), HandleState::Terminated);

    let err = calculator.add(1, 1).await.unwrap_err();
    assert!(matches!(err, SpindleError::InvalidState { .. }));

    calculator.handle().join();
    assert!(calculator.handle().is_finished());
}

#[tokio::test]
async fn test_raised_value_reaches_caller() {
    let (calculator, _) = calculator();

    let err = calculator.fail("out of range").await.unwrap_err();
    match err {
        SpindleError::Remote(raised) => {
            assert_eq!(raised, Value::Record(Fields::new().with("reason", "out of range")));
        }
        other => panic!("expected a remote error, got {other:?}"),
    }

    // The worker keeps serving after a failed call.
    assert_eq!(calculator.add(1, 2).await.unwrap(), 3);
    calculator.dispose().await.unwrap();
}

#[tokio::test]
async fn test_missing_method() {
    let (calculator, _) = calculator();

    let err = calculator
        .handle()
        .execute("divide", vec![Value::from(1), Value::from(0)])
        .await
        .unwrap_err();
    assert_eq!(
        err.into_remote(),
        Some(Value::from("The function 'divide' does not exist"))
    );
    calculator.dispose().await.unwrap();
}

#[tokio::test]
async fn test_registered_type_keeps_identity() {
    let (calculator, _) = calculator();

    let midpoint = calculator
        .midpoint(
            Value::object(Point { x: 0, y: 0 }),
            Value::object(Point { x: 10, y: -4 }),
        )
        .await
        .unwrap();
    assert_eq!(midpoint.downcast_ref::<Point>(), Some(&Point { x: 5, y: -2 }));

    let label = calculator.label("plain").await.unwrap();
    assert!(label.downcast_ref::<Label>().is_none());
    assert_eq!(label, Value::Record(Fields::new().with("text", "plain")));

    calculator.dispose().await.unwrap();
}

#[tokio::test]
async fn test_slow_call_does_not_block_later_calls() {
    let (calculator, _) = calculator();

    let slow = calculator.sleep(300);
    let fast = calculator.add(20, 22);
    tokio::pin!(slow);

    let sum = tokio::select! {
        biased;
        _ = &mut slow => panic!("the slow call finished first"),
        sum = fast => sum.unwrap(),
    };
    assert_eq!(sum, 42);
    assert_eq!(slow.await.unwrap(), 300);
    calculator.dispose().await.unwrap();
}

#[tokio::test]
async fn test_workers_spawn_workers() {
    Lazy::force(&REGISTRY);
    let relay = WorkerHandle::spawn_with::<Relay>(WorkerOptions::named("relay"), vec![]).unwrap();

    let sum = relay
        .execute("add", vec![Value::from(7), Value::from(8)])
        .await
        .unwrap();
    assert_eq!(sum, Value::from(15));

    relay.dispose().await.unwrap();
}

#[tokio::test]
async fn test_unregistered_blueprint_is_not_threadable() {
    Lazy::force(&REGISTRY);
    let err = WorkerHandle::spawn::<NeverRegistered>(vec![]).unwrap_err();
    assert!(matches!(err, SpindleError::NotThreadable { .. }));
    assert_eq!(
        err.to_string(),
        format!(
            "The blueprint '{}' has not been registered as a thread",
            std::any::type_name::<NeverRegistered>()
        )
    );
}

#[test]
fn test_registry_installs_once() {
    Lazy::force(&REGISTRY);
    assert!(Registry::is_installed());
    let err = Registry::builder().install().unwrap_err();
    assert!(matches!(err, SpindleError::AlreadyInstalled));
}
