mod device_view;
mod painter;
mod report_view;
mod table;

pub(crate) use self::device_view::DeviceListView;
pub(crate) use self::painter::Painter;
pub(crate) use self::report_view::{RecordView, ReportView};
