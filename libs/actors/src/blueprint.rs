//! Blueprints: the types a worker thread can host
//!
//! A blueprint instance lives on exactly one worker thread and never moves,
//! so neither the trait nor its futures need to be `Send`. Methods take
//! `&self`; overlapping calls interleave cooperatively on the worker's
//! local executor, so mutable state goes behind `Cell`/`RefCell`.

use crate::error::SpindleError;
use async_trait::async_trait;
use spindle_codec::{CodecError, FromValue, MarshalObject, Value};
use std::fmt;

/// A failed remote method, as reported back to the caller
#[derive(Debug)]
pub enum Fault {
    /// No method with this name is exported
    NotFound(String),
    /// The method raised this value
    Raised(Value),
}

impl Fault {
    pub fn raise(value: impl Into<Value>) -> Self {
        Fault::Raised(value.into())
    }

    /// Value sent in the `error` reply
    pub fn into_value(self) -> Value {
        match self {
            Fault::NotFound(method) => {
                Value::String(format!("The function '{method}' does not exist"))
            }
            Fault::Raised(value) => value,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::NotFound(method) => write!(f, "The function '{method}' does not exist"),
            Fault::Raised(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<CodecError> for Fault {
    fn from(err: CodecError) -> Self {
        Fault::Raised(Value::String(err.to_string()))
    }
}

impl From<SpindleError> for Fault {
    fn from(err: SpindleError) -> Self {
        match err {
            SpindleError::Remote(value) => Fault::Raised(value),
            other => Fault::Raised(Value::String(other.to_string())),
        }
    }
}

/// Positional arguments of a construct or execute request
#[derive(Debug, Default)]
pub struct Args {
    values: Vec<Option<Value>>,
}

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values: values.into_iter().map(Some).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Take argument `index` and convert it
    ///
    /// Each argument can be taken once; a second take reports it missing.
    pub fn take<T: FromValue>(&mut self, index: usize) -> Result<T, CodecError> {
        let received = self.values.len();
        let value = self
            .values
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(CodecError::MissingArgument { index, received })?;
        T::from_value(value)
    }

    /// Take argument `index` as a live instance of a registered type
    pub fn take_object<T: MarshalObject>(&mut self, index: usize) -> Result<T, CodecError> {
        self.take::<Value>(index)?.into_object()
    }

    /// Remaining arguments, in order
    pub fn into_values(self) -> Vec<Value> {
        self.values.into_iter().flatten().collect()
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

impl FromIterator<Value> for Args {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// A type that can be instantiated inside a spawned worker
///
/// `invoke` dispatches by method name; names it does not export should
/// return [`Fault::NotFound`]. `dispose` runs before the worker
/// acknowledges a dispose request.
#[async_trait(?Send)]
pub trait Blueprint: 'static {
    /// Build the instance from the spawn arguments
    fn construct(args: Args) -> Result<Self, Fault>
    where
        Self: Sized;

    async fn invoke(&self, method: &str, args: Args) -> Result<Value, Fault>;

    async fn dispose(&self) {}
}

/// The single entry blueprint of the host process
#[async_trait(?Send)]
pub trait Main: 'static {
    /// Run with the process arguments; the return value is the exit code
    async fn main(&self, args: Vec<String>) -> crate::Result<i32>;
}

/// Declare the typed client of a blueprint
///
/// ```ignore
/// remote_interface! {
///     pub struct AdderClient for Adder {
///         fn add(a: i64, b: i64) -> i64;
///     }
/// }
///
/// let adder = AdderClient::spawn(vec![])?;
/// assert_eq!(adder.add(1, 2).await?, 3);
/// adder.dispose().await?;
/// ```
///
/// Each declared method becomes an `async fn` that converts its arguments
/// into [`Value`]s, calls the worker by name and converts the reply. The
/// `dispose` name is reserved for the handle.
#[macro_export]
macro_rules! remote_interface {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident for $blueprint:ty {
            $(
                $(#[$method_meta:meta])*
                fn $method:ident ( $( $arg:ident : $arg_ty:ty ),* $(,)? ) -> $ret:ty ;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        $vis struct $name {
            handle: $crate::WorkerHandle,
        }

        impl $name {
            /// Names of the methods this client forwards
            pub const METHODS: &'static [&'static str] = &[$(stringify!($method)),*];

            pub fn spawn(args: ::std::vec::Vec<$crate::Value>) -> $crate::Result<Self> {
                $crate::WorkerHandle::spawn::<$blueprint>(args).map(Self::from_handle)
            }

            pub fn spawn_with(
                options: $crate::WorkerOptions,
                args: ::std::vec::Vec<$crate::Value>,
            ) -> $crate::Result<Self> {
                $crate::WorkerHandle::spawn_with::<$blueprint>(options, args).map(Self::from_handle)
            }

            pub fn from_handle(handle: $crate::WorkerHandle) -> Self {
                Self { handle }
            }

            pub fn handle(&self) -> &$crate::WorkerHandle {
                &self.handle
            }

            $(
                $(#[$method_meta])*
                pub async fn $method(&self, $( $arg : $arg_ty ),*) -> $crate::Result<$ret> {
                    let reply = self
                        .handle
                        .execute(
                            stringify!($method),
                            ::std::vec![$( $crate::Value::from($arg) ),*],
                        )
                        .await?;
                    Ok(<$ret as $crate::FromValue>::from_value(reply)?)
                }
            )*

            /// Run the worker's dispose logic and terminate it
            pub async fn dispose(&self) -> $crate::Result<()> {
                self.handle.dispose().await
            }
        }
    };
}
