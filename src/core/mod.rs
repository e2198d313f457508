pub mod cache;
pub mod classify;
pub mod dispatch;
pub mod engine;
pub mod extract;
pub mod gateway;
pub mod normalize;
pub mod ollama;
pub mod payload;

pub use crate::domain::model::{
    ApiCallRequest, Chain, ClassifyMode, CleanedRow, ExecutionResult, FunctionType, RawRow,
    RunReport, SkippedRow,
};
pub use crate::domain::ports::{ConfigProvider, Pipeline, Storage, TextGenerator};
pub use crate::utils::error::Result;
