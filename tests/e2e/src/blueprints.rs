//! Blueprints taking part in the scenario

use crate::scenario;
use spindle::{async_trait, remote_interface, Args, Blueprint, Fault, Fields, Main, Receiver, Value};
use std::cell::RefCell;
use tracing::{debug, info, warn};

macro_rules! constant_worker {
    ($($name:ident => $value:expr),* $(,)?) => {
        $(
            #[doc = concat!("Worker whose `value` method always returns ", stringify!($value))]
            pub struct $name;

            #[async_trait(?Send)]
            impl Blueprint for $name {
                fn construct(_: Args) -> Result<Self, Fault> {
                    Ok($name)
                }

                async fn invoke(&self, method: &str, _: Args) -> Result<Value, Fault> {
                    match method {
                        "value" => Ok(Value::from($value as i64)),
                        other => Err(Fault::NotFound(other.to_string())),
                    }
                }
            }
        )*
    };
}

constant_worker! {
    One => 1,
    Two => 2,
    Three => 3,
    Four => 4,
}

/// Sums every tuple arriving on its receiver
pub struct Accumulator {
    source: RefCell<Option<Receiver>>,
}

#[async_trait(?Send)]
impl Blueprint for Accumulator {
    fn construct(mut args: Args) -> Result<Self, Fault> {
        Ok(Accumulator {
            source: RefCell::new(Some(args.take_object::<Receiver>(0)?)),
        })
    }

    async fn invoke(&self, method: &str, _: Args) -> Result<Value, Fault> {
        match method {
            "drain" => self.drain().await,
            other => Err(Fault::NotFound(other.to_string())),
        }
    }

    async fn dispose(&self) {
        if self.source.borrow().is_some() {
            warn!("Accumulator disposed before draining its channel");
        }
    }
}

impl Accumulator {
    async fn drain(&self) -> Result<Value, Fault> {
        let mut receiver = self
            .source
            .borrow_mut()
            .take()
            .ok_or_else(|| Fault::raise("the channel was already drained"))?;

        let mut total = 0i64;
        let mut rounds = 0i64;
        while let Some(tuple) = receiver.receive_as::<Vec<i64>>().await? {
            debug!(round = rounds, ?tuple, "Accumulating tuple");
            total += tuple.iter().sum::<i64>();
            rounds += 1;
        }
        Ok(Value::Record(
            Fields::new().with("total", total).with("rounds", rounds),
        ))
    }
}

remote_interface! {
    /// Typed client of [`Accumulator`]
    pub struct AccumulatorClient for Accumulator {
        /// Consume the channel to its end and report the sum
        fn drain() -> Fields;
    }
}

/// Process entry point of the runner binary
///
/// The first argument, when present, is the number of rounds.
#[derive(Default)]
pub struct Coordinator;

#[async_trait(?Send)]
impl Main for Coordinator {
    async fn main(&self, args: Vec<String>) -> spindle::Result<i32> {
        let rounds = args
            .first()
            .and_then(|rounds| rounds.parse().ok())
            .unwrap_or(scenario::DEFAULT_ROUNDS);

        let report = scenario::run_rounds(rounds, scenario::worker_options()).await?;
        let expected = scenario::expected_total(rounds);
        if report.total == expected {
            info!(rounds, total = report.total, "Scenario passed");
            Ok(0)
        } else {
            warn!(rounds, total = report.total, expected, "Scenario total mismatch");
            Ok(1)
        }
    }
}
