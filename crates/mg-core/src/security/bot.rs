//! Heuristic bot detection from client environment signals.
//!
//! Nothing here is authoritative. A real browser with unusual settings can
//! trip a signal, and a careful automation stack can avoid all of them. The
//! signals are for logging and for dropping the laziest form-fillers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Browser-reported signals captured once per page load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientEnvironment {
    pub user_agent: String,
    pub languages: Vec<String>,
    pub plugins: u32,
    /// Whether the Chrome extension runtime object is present.
    pub chrome_runtime: bool,
    /// `navigator.webdriver` as reported. Collected but not scored.
    pub webdriver: Option<bool>,
    pub screen_width: u32,
    pub screen_height: u32,
    pub color_depth: u32,
    pub timezone_offset_minutes: i32,
    pub hardware_concurrency: u32,
    pub platform: String,
}

impl ClientEnvironment {
    /// A typical desktop Chrome environment.
    pub fn desktop_chrome() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
                .to_string(),
            languages: vec!["ar-IQ".to_string(), "ar".to_string(), "en".to_string()],
            plugins: 5,
            chrome_runtime: true,
            webdriver: Some(false),
            screen_width: 1920,
            screen_height: 1080,
            color_depth: 24,
            timezone_offset_minutes: -180,
            hardware_concurrency: 8,
            platform: "Win32".to_string(),
        }
    }
}

/// A single reason an environment looks automated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotSignal {
    MissingUserAgent,
    NoLanguages,
    NoPlugins,
    /// User agent claims Chrome but the Chrome runtime is absent.
    FakeChrome,
    /// User agent contains a known automation marker.
    HeadlessUserAgent(String),
}

impl fmt::Display for BotSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingUserAgent => write!(f, "missing_user_agent"),
            Self::NoLanguages => write!(f, "no_languages"),
            Self::NoPlugins => write!(f, "no_plugins"),
            Self::FakeChrome => write!(f, "fake_chrome"),
            Self::HeadlessUserAgent(marker) => write!(f, "headless_user_agent:{}", marker),
        }
    }
}

/// Lower-cased user-agent fragments left by common automation tools.
const HEADLESS_MARKERS: &[&str] = &[
    "headlesschrome",
    "phantomjs",
    "selenium",
    "webdriver",
    "puppeteer",
    "playwright",
    "slimerjs",
    "nightmare",
];

/// Inspect `env` and return every suspicious signal, or `None` if it looks human.
///
/// The `webdriver` flag is collected but not scored; no rule for it has been
/// agreed yet.
pub fn detect_bot(env: &ClientEnvironment) -> Option<Vec<BotSignal>> {
    let mut signals = Vec::new();
    let ua = env.user_agent.to_lowercase();

    if ua.trim().is_empty() {
        signals.push(BotSignal::MissingUserAgent);
    }
    if env.languages.is_empty() {
        signals.push(BotSignal::NoLanguages);
    }
    if env.plugins == 0 {
        signals.push(BotSignal::NoPlugins);
    }
    let claims_chrome = ua.contains("chrome") && !ua.contains("edg/") && !ua.contains("opr/");
    if claims_chrome && !env.chrome_runtime {
        signals.push(BotSignal::FakeChrome);
    }
    if let Some(marker) = HEADLESS_MARKERS.iter().find(|m| ua.contains(*m)) {
        signals.push(BotSignal::HeadlessUserAgent((*marker).to_string()));
    }

    if signals.is_empty() {
        None
    } else {
        Some(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_browser_passes() {
        assert_eq!(detect_bot(&ClientEnvironment::desktop_chrome()), None);
    }

    #[test]
    fn test_headless_chrome_flagged() {
        let mut env = ClientEnvironment::desktop_chrome();
        env.user_agent = env.user_agent.replace("Chrome/", "HeadlessChrome/");
        let signals = detect_bot(&env).unwrap();
        assert!(signals.contains(&BotSignal::HeadlessUserAgent("headlesschrome".into())));
    }

    #[test]
    fn test_empty_environment_flags_everything() {
        let signals = detect_bot(&ClientEnvironment::default()).unwrap();
        assert!(signals.contains(&BotSignal::MissingUserAgent));
        assert!(signals.contains(&BotSignal::NoLanguages));
        assert!(signals.contains(&BotSignal::NoPlugins));
    }

    #[test]
    fn test_fake_chrome() {
        let mut env = ClientEnvironment::desktop_chrome();
        env.chrome_runtime = false;
        assert_eq!(detect_bot(&env), Some(vec![BotSignal::FakeChrome]));
    }

    #[test]
    fn test_webdriver_flag_is_inert() {
        let mut env = ClientEnvironment::desktop_chrome();
        env.webdriver = Some(true);
        assert_eq!(detect_bot(&env), None);
    }

    #[test]
    fn test_signal_display() {
        assert_eq!(BotSignal::NoPlugins.to_string(), "no_plugins");
        assert_eq!(
            BotSignal::HeadlessUserAgent("phantomjs".into()).to_string(),
            "headless_user_agent:phantomjs"
        );
    }
}
