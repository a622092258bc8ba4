use owo_colors::{OwoColorize, Style as OwoStyle};

use crate::spa::DeviceMode;

/// Signal strength at or above which a spa counts as close by.
const STRONG_RSSI: i16 = -60;
/// Signal strength below which a spa is likely to drop.
const WEAK_RSSI: i16 = -85;

/// Applies colour and style to terminal text.
#[derive(Debug)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    /// Creates a painter with explicit colour control.
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn heading<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().cyan())
    }

    pub(crate) fn muted<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().dimmed())
    }

    pub(crate) fn value<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold())
    }

    /// Injected or simulated failures reported by the transport.
    pub(crate) fn fault<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().red())
    }

    /// A failure counter, highlighted only when something failed.
    pub(crate) fn fault_count(&self, count: usize) -> String {
        if count == 0 {
            self.value(count.to_string())
        } else {
            self.fault(count.to_string())
        }
    }

    /// Advertised signal strength, coloured by link quality.
    pub(crate) fn rssi(&self, rssi: Option<i16>) -> String {
        let Some(rssi) = rssi else {
            return self.muted("rssi=?");
        };
        let text = format!("rssi={rssi}");
        let style = if rssi >= STRONG_RSSI {
            OwoStyle::new().green()
        } else if rssi < WEAK_RSSI {
            OwoStyle::new().yellow()
        } else {
            OwoStyle::new().dimmed()
        };
        self.paint(&text, style)
    }

    /// Colours a device mode by how much access it grants.
    pub(crate) fn mode(&self, mode: DeviceMode) -> String {
        let style = match mode {
            DeviceMode::Master => OwoStyle::new().bold().green(),
            DeviceMode::Free | DeviceMode::NonMaster => OwoStyle::new().bold(),
            DeviceMode::Blocked => OwoStyle::new().bold().yellow(),
        };
        self.paint(&mode.to_string(), style)
    }

    fn paint(&self, text: &str, style: OwoStyle) -> String {
        if self.use_colour {
            format!("{}", text.style(style))
        } else {
            text.to_string()
        }
    }
}
