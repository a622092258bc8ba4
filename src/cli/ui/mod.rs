mod painter;
mod scan_view;
mod session_view;
mod table;

pub(crate) use self::painter::Painter;
pub(crate) use self::scan_view::{ScanEventView, ScanSummaryView};
pub(crate) use self::session_view::SessionReportView;
