use std::time::Duration;

use anyhow::{Result, bail};
use log::info;
use serde_derive::Serialize;

use crate::{
    config::MailerConfig, reminders::Reminder, settings::DashboardSettings, severity::Severity,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

pub trait Mailer: Send + Sync + 'static {
    fn send(&self, message: &EmailMessage) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

/// Posts messages to a transactional mail API as JSON.
#[derive(Clone)]
pub struct HttpMailer {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(config: &MailerConfig) -> Result<Self> {
        if config.api_url.is_empty() || config.from.is_empty() {
            bail!("mailer.api_url and mailer.from must be set unless mailer.dry_run is enabled");
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(HttpMailer {
            http,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            from: config.from.clone(),
        })
    }
}

impl Mailer for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let request = SendEmailRequest {
            from: &self.from,
            to: [&message.to],
            subject: &message.subject,
            html: &message.html,
            text: &message.text,
        };

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("mail API responded with {status}: {body}");
        }

        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct DryRunMailer;

impl Mailer for DryRunMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            "Dry run, not sending {:?} to {}:\n{}",
            message.subject, message.to, message.text
        );
        Ok(())
    }
}

#[derive(Clone)]
pub enum MailerImpl {
    Http(HttpMailer),
    DryRun(DryRunMailer),
}

impl MailerImpl {
    pub fn new(config: &MailerConfig) -> Result<Self> {
        if config.dry_run {
            Ok(MailerImpl::DryRun(DryRunMailer))
        } else {
            Ok(MailerImpl::Http(HttpMailer::new(config)?))
        }
    }
}

impl Mailer for MailerImpl {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        match self {
            MailerImpl::Http(mailer) => mailer.send(message).await,
            MailerImpl::DryRun(mailer) => mailer.send(message).await,
        }
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

pub fn render_reminder_email(
    reminder: &Reminder,
    severity: &Severity,
    settings: &DashboardSettings,
) -> EmailMessage {
    let amount = reminder.formatted_amount();

    let text = format!(
        "Hello {name},\n\n\
         This is a reminder about the payment for \"{description}\" of {amount}.\n\
         Status: {label}.\n\n\
         Thank you,\n{business}\n",
        name = reminder.contact_name,
        description = reminder.description,
        label = severity.label,
        business = settings.business_name,
    );

    let html = format!(
        "<p>Hello {name},</p>\
         <p>This is a reminder about the payment for <strong>{description}</strong> of <strong>{amount}</strong>.</p>\
         <p>Status: {label}.</p>\
         <p>Thank you,<br>{business}</p>",
        name = escape_html(&reminder.contact_name),
        description = escape_html(&reminder.description),
        amount = escape_html(&amount),
        label = escape_html(&severity.label),
        business = escape_html(&settings.business_name),
    );

    EmailMessage {
        to: reminder.contact_email.clone(),
        subject: format!(
            "Payment reminder: {} ({})",
            reminder.description, severity.label
        ),
        html,
        text,
    }
}
