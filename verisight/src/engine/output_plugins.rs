/*!
Report sinks: terminal, JSON-lines file and webhook
*/

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{error, info};

use crate::engine::config::{OutputConfig, OutputPlugin, TerminalFormat};
use crate::engine::report::{ReportView, RiskCategory};

pub type OutputResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Trait for output plugins
#[async_trait]
pub trait OutputHandler: Send {
    /// Name of the output handler
    fn name(&self) -> &'static str;

    /// Initialize the output handler (create files, connections, etc.)
    async fn initialize(&mut self) -> OutputResult;

    /// Emit one report view; `source` names the submission it came from
    async fn handle_report(&mut self, source: &str, report: &ReportView<'_>) -> OutputResult;

    /// Cleanup/finalize the output handler
    async fn finalize(&mut self) -> OutputResult;
}

/// Manages multiple output handlers
pub struct OutputManager {
    handlers: Vec<Box<dyn OutputHandler>>,
}

impl OutputManager {
    pub fn new(configs: &[OutputConfig]) -> Self {
        let handlers: Vec<Box<dyn OutputHandler>> = configs
            .iter()
            .filter(|config| config.enabled)
            .map(|config| -> Box<dyn OutputHandler> {
                match &config.plugin {
                    OutputPlugin::Json { path, pretty } => Box::new(JsonOutputHandler::new(path.clone(), *pretty)),
                    OutputPlugin::Webhook { url, auth_token } => {
                        Box::new(WebhookOutputHandler::new(url.clone(), auth_token.clone()))
                    }
                    OutputPlugin::Terminal { format } => Box::new(TerminalOutputHandler::new(*format)),
                }
            })
            .collect();

        info!("Initialized output manager with {} handlers", handlers.len());
        Self { handlers }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Initialize all handlers
    pub async fn initialize(&mut self) -> OutputResult {
        for handler in &mut self.handlers {
            handler.initialize().await?;
            info!("Initialized output handler: {}", handler.name());
        }
        Ok(())
    }

    /// Send a report to every handler. Handler failures are logged and
    /// never propagate.
    pub async fn handle_report(&mut self, source: &str, report: &ReportView<'_>) {
        for handler in &mut self.handlers {
            if let Err(e) = handler.handle_report(source, report).await {
                error!(
                    "Handler {} failed to emit report {}: {}",
                    handler.name(),
                    report.fingerprint.short(),
                    e
                );
            }
        }
    }

    /// Finalize all handlers
    pub async fn finalize(&mut self) -> OutputResult {
        for handler in &mut self.handlers {
            handler.finalize().await?;
        }
        Ok(())
    }
}

/// One JSON object per report, appended to a file.
#[derive(serde::Serialize)]
struct Envelope<'a> {
    source: &'a str,
    #[serde(flatten)]
    report: &'a ReportView<'a>,
}

/// JSON file output handler
pub struct JsonOutputHandler {
    file_path: PathBuf,
    pretty: bool,
    file: Option<std::fs::File>,
}

impl JsonOutputHandler {
    pub fn new(file_path: PathBuf, pretty: bool) -> Self {
        Self {
            file_path,
            pretty,
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

#[async_trait]
impl OutputHandler for JsonOutputHandler {
    fn name(&self) -> &'static str {
        "JSON"
    }

    async fn initialize(&mut self) -> OutputResult {
        if let Some(parent) = self.file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.file = Some(OpenOptions::new().create(true).append(true).open(&self.file_path)?);
        Ok(())
    }

    async fn handle_report(&mut self, source: &str, report: &ReportView<'_>) -> OutputResult {
        if let Some(ref mut file) = self.file {
            let envelope = Envelope { source, report };
            let json_str = if self.pretty {
                serde_json::to_string_pretty(&envelope)?
            } else {
                serde_json::to_string(&envelope)?
            };

            writeln!(file, "{}", json_str)?;
            file.flush()?;
        }
        Ok(())
    }

    async fn finalize(&mut self) -> OutputResult {
        if let Some(ref mut file) = self.file {
            file.flush()?;
        }
        Ok(())
    }
}

/// Webhook output handler
pub struct WebhookOutputHandler {
    url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl WebhookOutputHandler {
    pub fn new(url: String, auth_token: Option<String>) -> Self {
        Self {
            url,
            auth_token,
            client: reqwest::Client::new(),
        }
    }

    fn request(&self) -> reqwest::RequestBuilder {
        let request = self.client.post(&self.url);
        match self.auth_token {
            Some(ref token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }
}

#[async_trait]
impl OutputHandler for WebhookOutputHandler {
    fn name(&self) -> &'static str {
        "Webhook"
    }

    async fn initialize(&mut self) -> OutputResult {
        let test_payload = serde_json::json!({
            "test": true,
            "timestamp": chrono::Utc::now().timestamp()
        });

        let response = self.request().json(&test_payload).send().await?;
        if !response.status().is_success() {
            return Err(format!("Webhook test failed: {}", response.status()).into());
        }
        Ok(())
    }

    async fn handle_report(&mut self, source: &str, report: &ReportView<'_>) -> OutputResult {
        let response = self.request().json(&Envelope { source, report }).send().await?;
        if !response.status().is_success() {
            return Err(format!("Webhook delivery failed: {}", response.status()).into());
        }
        Ok(())
    }

    async fn finalize(&mut self) -> OutputResult {
        Ok(())
    }
}

/// Terminal output handler
pub struct TerminalOutputHandler {
    format: TerminalFormat,
}

impl TerminalOutputHandler {
    pub fn new(format: TerminalFormat) -> Self {
        Self { format }
    }

    fn format_report(&self, source: &str, report: &ReportView<'_>) -> String {
        match self.format {
            TerminalFormat::Plain => plain(source, report),
            TerminalFormat::Colored => colored(source, report),
            TerminalFormat::Json => serde_json::to_string_pretty(&Envelope { source, report })
                .unwrap_or_else(|_| "JSON serialization failed".to_string()),
        }
    }
}

fn plain(source: &str, report: &ReportView<'_>) -> String {
    let mut out = format!(
        "{}: {} risk, score {}/100 [{}]\n{}\n",
        source,
        report.category,
        report.score,
        report.fingerprint.short(),
        report.explanation.summary
    );
    for detail in &report.explanation.details {
        out.push_str(&format!("  - {}\n", detail));
    }
    out.push_str(&format!("Recommendation: {}", report.explanation.recommendation));
    out
}

fn colored(source: &str, report: &ReportView<'_>) -> String {
    let color = match report.category {
        RiskCategory::Low => "\x1b[32m",
        RiskCategory::Medium => "\x1b[33m",
        RiskCategory::High => "\x1b[31m",
    };
    let mut out = format!(
        "\x1b[1m🖼️  {}\x1b[0m\n\
         \x1b[36m🎯 Score:\x1b[0m {}{}/100 ({} risk)\x1b[0m\n\
         \x1b[36m🔑 Fingerprint:\x1b[0m {}\n\
         \x1b[36m📝 Summary:\x1b[0m {}\n",
        source,
        color,
        report.score,
        report.category,
        report.fingerprint.short(),
        report.explanation.summary
    );
    for summary in &report.summaries {
        let signal = summary
            .confidence
            .map(|c| format!("{:.2}", c))
            .unwrap_or_else(|| "unavailable".to_string());
        out.push_str(&format!(
            "   {:<14} {:>11}  weight {:.3}\n",
            summary.category.label(),
            signal,
            summary.effective_weight
        ));
    }
    for detail in &report.explanation.details {
        out.push_str(&format!("\x1b[36m  •\x1b[0m {}\n", detail));
    }
    out.push_str(&format!(
        "\x1b[36m💡 Recommendation:\x1b[0m {}",
        report.explanation.recommendation
    ));
    out
}

#[async_trait]
impl OutputHandler for TerminalOutputHandler {
    fn name(&self) -> &'static str {
        "Terminal"
    }

    async fn initialize(&mut self) -> OutputResult {
        Ok(())
    }

    async fn handle_report(&mut self, source: &str, report: &ReportView<'_>) -> OutputResult {
        println!("{}", self.format_report(source, report));
        if self.format != TerminalFormat::Json {
            println!();
        }
        Ok(())
    }

    async fn finalize(&mut self) -> OutputResult {
        Ok(())
    }
}
