pub(crate) mod command;
pub(crate) mod decode;
pub(crate) mod poll;
pub(crate) mod run;
pub(crate) mod scan;
mod shutdown;
pub(crate) mod ui;

pub use self::command::{
    AcquisitionArgs, Args, Command, DecodeArgs, DeliveryArgs, FakeArgs, LogLevel, OutputFormat,
    RoundArgs, ScanArgs,
};
