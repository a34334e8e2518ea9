//! Local status display collaborator

use solarstation_shared::state_machine::{LinkState, TransportFault};
use solarstation_shared::Snapshot;
use tracing::info;

/// Connectivity flags shown alongside the readings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationStatus {
    pub link_up: bool,
    pub connection: LinkState,
    pub pending: bool,
    /// Connect attempts since boot
    pub attempts: u64,
    pub last_error: Option<TransportFault>,
}

pub trait Display: Send {
    /// Render the latest readings (if any) and the current status
    fn render(&mut self, snapshot: Option<&Snapshot>, status: &StationStatus);
}

/// Which group of readings is on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Page {
    #[default]
    Environment,
    Electrical,
}

impl Page {
    fn next(self) -> Self {
        match self {
            Page::Environment => Page::Electrical,
            Page::Electrical => Page::Environment,
        }
    }
}

/// Display that writes each screen to the log, alternating pages per render
#[derive(Debug, Default)]
pub struct LogDisplay {
    page: Page,
}

impl LogDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn page(&self) -> Page {
        self.page
    }

    /// Text lines for one screen
    pub fn compose(page: Page, snapshot: Option<&Snapshot>, status: &StationStatus) -> Vec<String> {
        let mut lines = Vec::with_capacity(6);
        if !status.link_up {
            lines.push("wifi down".to_string());
        }
        lines.push(format!(
            "tcp={} pend={} tries={}",
            status.connection,
            if status.pending { 1 } else { 0 },
            status.attempts
        ));
        if let Some(fault) = status.last_error.filter(|_| status.connection != LinkState::Connected) {
            lines.push(format!("err={}", fault));
        }

        let Some(s) = snapshot else {
            lines.push("no data".to_string());
            return lines;
        };

        match page {
            Page::Environment => {
                for (n, lux) in s.lux.iter().enumerate() {
                    lines.push(format!("l{}={:.2}", n + 1, lux));
                }
                lines.push(format!("pt={:.2}", s.pitch));
                lines.push(format!("rl={:.2}", s.roll));
                lines.push(format!("tp={:.2}", s.temperature));
            }
            Page::Electrical => {
                lines.push(format!("vb={:.2}", s.bus_voltage));
                lines.push(format!("vs={:.4}", s.shunt_voltage));
                lines.push(format!("i={:.4}", s.current));
                lines.push(format!("p={:.4}", s.power));
            }
        }
        lines
    }
}

impl Display for LogDisplay {
    fn render(&mut self, snapshot: Option<&Snapshot>, status: &StationStatus) {
        let screen = Self::compose(self.page, snapshot, status).join(" | ");
        info!(target: "display", "{}", screen);
        self.page = self.page.next();
    }
}
