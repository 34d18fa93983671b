mod address;
pub(crate) mod macros;

pub use self::address::{
    DriverId, Dtb, ModuleId, Pa, Process, Span, Thread, Va, VmaId, KERNEL_SPACE_START,
};
