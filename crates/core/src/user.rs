// User profile and report preferences

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::content::AiConfig;

/// Where a weekly report is delivered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationChannel {
    Email { address: String },
    Webhook { url: String },
}

impl NotificationChannel {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationChannel::Email { .. } => "email",
            NotificationChannel::Webhook { .. } => "webhook",
        }
    }
}

/// Weekly report settings. Eligibility is explicit and independent of the AI config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ReportPreferences {
    pub weekly_report_enabled: bool,
    pub channel: Option<NotificationChannel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct UserProfile {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub ai_config: Option<AiConfig>,
    #[serde(default)]
    pub report_preferences: ReportPreferences,
}

impl UserProfile {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            display_name: None,
            ai_config: None,
            report_preferences: ReportPreferences::default(),
        }
    }

    pub fn with_weekly_report(mut self, channel: NotificationChannel) -> Self {
        self.report_preferences = ReportPreferences {
            weekly_report_enabled: true,
            channel: Some(channel),
        };
        self
    }

    pub fn with_ai_config(mut self, config: AiConfig) -> Self {
        self.ai_config = Some(config);
        self
    }

    /// `Some` only if reports are enabled and a channel is configured
    pub fn report_target(&self) -> Option<ReportTarget> {
        let prefs = &self.report_preferences;
        match (&prefs.channel, prefs.weekly_report_enabled) {
            (Some(channel), true) => Some(ReportTarget {
                user_id: self.id,
                channel: channel.clone(),
            }),
            _ => None,
        }
    }
}

/// A user eligible for the weekly report, computed fresh at each tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTarget {
    pub user_id: Uuid,
    pub channel: NotificationChannel,
}
