//! Transactional and newsletter email.
//!
//! Supports two modes:
//! 1. Send via Resend API (when an API key is configured)
//! 2. Disabled (no email sent, log only)

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::PurchaseWithItems;

/// Retry delays in seconds (exponential backoff: 1s, 4s, 16s)
const RETRY_DELAYS: &[u64] = &[1, 4, 16];

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Format a Unix timestamp as a human-readable date (e.g., "Jan 15, 2024")
pub fn format_date(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%b %d, %Y").to_string())
        .unwrap_or_else(|| "Unknown date".to_string())
}

/// Format integer minor units as "12.34 USD".
pub fn format_amount(cents: i64, currency: &str) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.abs();
    format!(
        "{}{}.{:02} {}",
        sign,
        cents / 100,
        cents % 100,
        currency.to_uppercase()
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Result of attempting to send an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailSendResult {
    /// Email was sent successfully via Resend
    Sent,
    /// No API key configured; the message was only logged
    Disabled,
}

/// A rendered message ready for delivery.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

fn wrap_html(heading: &str, inner: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
<h2 style="color: #333;">{}</h2>
{}
</body>
</html>"#,
        escape_html(heading),
        inner
    )
}

impl EmailMessage {
    pub fn login_code(to: &str, code: &str, expires_in_minutes: i64) -> Self {
        let subject = "Your CourseHub sign-in code".to_string();
        let text = format!(
            "Your sign-in code is: {}\n\nThis code expires in {} minutes and can be used once.\n\nIf you didn't request this, you can ignore this email.",
            code, expires_in_minutes
        );
        let html = wrap_html(
            &subject,
            &format!(
                r#"<p>Use this code to sign in:</p>
<div style="background: #f5f5f5; padding: 20px; border-radius: 8px; text-align: center;">
<code style="font-size: 24px; font-weight: bold; letter-spacing: 4px; color: #333;">{}</code>
</div>
<p style="color: #666;">This code expires in {} minutes and can be used once.</p>
<hr style="border: none; border-top: 1px solid #eee; margin: 30px 0;">
<p style="color: #999; font-size: 12px;">If you didn't request this, you can ignore this email.</p>"#,
                code, expires_in_minutes
            ),
        );
        Self {
            to: to.to_string(),
            subject,
            text,
            html,
        }
    }

    pub fn purchase_receipt(to: &str, purchase: &PurchaseWithItems, base_url: &str) -> Self {
        let p = &purchase.purchase;
        let subject = "Your CourseHub receipt".to_string();
        let date = format_date(p.paid_at.unwrap_or(p.created_at));

        let mut text = format!("Thanks for your purchase ({}).\n\n", date);
        let mut rows = String::new();
        for item in &purchase.items {
            text.push_str(&format!(
                "{}  {}\n",
                item.title,
                format_amount(item.price_cents, &p.currency)
            ));
            rows.push_str(&format!(
                "<tr><td>{}</td><td style=\"text-align: right;\">{}</td></tr>",
                escape_html(&item.title),
                format_amount(item.price_cents, &p.currency)
            ));
        }
        if p.discount_cents > 0 {
            let code = p.coupon_code.as_deref().unwrap_or("coupon");
            text.push_str(&format!(
                "Discount ({})  -{}\n",
                code,
                format_amount(p.discount_cents, &p.currency)
            ));
            rows.push_str(&format!(
                "<tr><td>Discount ({})</td><td style=\"text-align: right;\">-{}</td></tr>",
                escape_html(code),
                format_amount(p.discount_cents, &p.currency)
            ));
        }
        let total = format_amount(p.total_cents, &p.currency);
        let courses_url = format!("{}/learn/courses", base_url.trim_end_matches('/'));
        text.push_str(&format!(
            "Total  {}\n\nReceipt: {}\nStart learning: {}",
            total, p.id, courses_url
        ));

        let html = wrap_html(
            "Thanks for your purchase",
            &format!(
                r#"<p style="color: #666;">{}</p>
<table style="width: 100%; border-collapse: collapse;">{}
<tr><td><strong>Total</strong></td><td style="text-align: right;"><strong>{}</strong></td></tr>
</table>
<p>Receipt <code>{}</code></p>
<p><a href="{}">Start learning</a></p>"#,
                date,
                rows,
                total,
                escape_html(&p.id),
                escape_html(&courses_url)
            ),
        );
        Self {
            to: to.to_string(),
            subject,
            text,
            html,
        }
    }

    pub fn certificate_issued(to: &str, course_title: &str, verify_url: &str) -> Self {
        let subject = format!("Your certificate for {}", course_title);
        let text = format!(
            "Congratulations on completing {}!\n\nAnyone can verify your certificate at:\n{}",
            course_title, verify_url
        );
        let html = wrap_html(
            "Congratulations!",
            &format!(
                r#"<p>You completed <strong>{}</strong>.</p>
<p>Anyone can verify your certificate at <a href="{}">{}</a>.</p>"#,
                escape_html(course_title),
                escape_html(verify_url),
                escape_html(verify_url)
            ),
        );
        Self {
            to: to.to_string(),
            subject,
            text,
            html,
        }
    }

    pub fn notification(to: &str, title: &str, body: &str, link: Option<&str>) -> Self {
        let mut text = body.to_string();
        let mut inner = format!("<p>{}</p>", escape_html(body));
        if let Some(link) = link {
            text.push_str(&format!("\n\n{}", link));
            inner.push_str(&format!(
                r#"<p><a href="{}">Open</a></p>"#,
                escape_html(link)
            ));
        }
        Self {
            to: to.to_string(),
            subject: title.to_string(),
            text,
            html: wrap_html(title, &inner),
        }
    }

    pub fn newsletter(to: &str, subject: &str, body: &str, unsubscribe_url: &str) -> Self {
        let text = format!("{}\n\n--\nUnsubscribe: {}", body, unsubscribe_url);
        let paragraphs: String = body
            .split("\n\n")
            .map(|p| format!("<p>{}</p>", escape_html(p)))
            .collect();
        let html = wrap_html(
            subject,
            &format!(
                r#"{}
<hr style="border: none; border-top: 1px solid #eee; margin: 30px 0;">
<p style="color: #999; font-size: 12px;"><a href="{}">Unsubscribe</a></p>"#,
                paragraphs,
                escape_html(unsubscribe_url)
            ),
        );
        Self {
            to: to.to_string(),
            subject: subject.to_string(),
            text,
            html,
        }
    }
}

/// Resend API request body.
#[derive(Debug, Serialize)]
struct ResendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    text: &'a str,
    html: &'a str,
}

/// Resend API response.
#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    #[allow(dead_code)]
    id: String,
}

/// Email service using Resend API.
#[derive(Clone)]
pub struct EmailService {
    api_key: Option<String>,
    from_email: String,
    api_url: String,
    retry_delays: Vec<u64>,
    http_client: Client,
}

impl EmailService {
    pub fn new(api_key: Option<String>, from_email: String) -> Self {
        Self {
            api_key,
            from_email,
            api_url: RESEND_API_URL.to_string(),
            retry_delays: RETRY_DELAYS.to_vec(),
            http_client: Client::new(),
        }
    }

    /// Point at a different Resend-compatible endpoint and retry schedule (tests).
    pub fn with_endpoint(mut self, api_url: impl Into<String>, retry_delays: Vec<u64>) -> Self {
        self.api_url = api_url.into();
        self.retry_delays = retry_delays;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Send a message, or log it when no API key is configured.
    pub async fn send(&self, message: &EmailMessage) -> Result<EmailSendResult> {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::info!(
                to = %message.to,
                subject = %message.subject,
                "Email delivery disabled (no RESEND_API_KEY), not sending"
            );
            tracing::debug!(body = %message.text, "Undelivered email body");
            return Ok(EmailSendResult::Disabled);
        };

        let request = ResendEmailRequest {
            from: &self.from_email,
            to: vec![&message.to],
            subject: &message.subject,
            text: &message.text,
            html: &message.html,
        };
        self.send_request_with_retry(api_key, &request, &message.to)
            .await
    }

    /// Fire-and-forget send for side effects that must not block a request.
    pub fn send_in_background(&self, message: EmailMessage) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.send(&message).await {
                tracing::error!(to = %message.to, error = %e, "Background email failed");
            }
        });
    }

    /// Send a request to Resend API with exponential backoff retry.
    ///
    /// Retries on transient errors (network issues, 5xx, 429 rate limit).
    /// Fails immediately on non-transient errors (4xx except 429).
    async fn send_request_with_retry(
        &self,
        api_key: &str,
        request: &ResendEmailRequest<'_>,
        to_email: &str,
    ) -> Result<EmailSendResult> {
        let mut last_error: Option<AppError> = None;

        for (attempt, delay_secs) in std::iter::once(&0u64)
            .chain(self.retry_delays.iter())
            .enumerate()
        {
            // Sleep before retry (skip on first attempt)
            if attempt > 0 {
                tracing::warn!(
                    attempt,
                    delay_secs,
                    "Retrying email send after transient failure"
                );
                tokio::time::sleep(Duration::from_secs(*delay_secs)).await;
            }

            match self.send_resend_request(api_key, request).await {
                Ok(()) => {
                    if attempt > 0 {
                        tracing::info!(attempt, to = %to_email, "Email sent successfully after retry");
                    } else {
                        tracing::info!(to = %to_email, "Email sent via Resend");
                    }
                    return Ok(EmailSendResult::Sent);
                }
                Err((error, true)) => last_error = Some(error),
                Err((error, false)) => return Err(error),
            }
        }

        // All retries exhausted
        tracing::error!(
            to = %to_email,
            attempts = self.retry_delays.len() + 1,
            "Email send failed after all retries"
        );
        Err(last_error.unwrap_or_else(|| {
            AppError::Internal("Email service error: all retries exhausted".into())
        }))
    }

    /// Send a single request to Resend API.
    ///
    /// Returns Ok(()) on success, or Err((AppError, is_transient)) on failure.
    async fn send_resend_request(
        &self,
        api_key: &str,
        request: &ResendEmailRequest<'_>,
    ) -> std::result::Result<(), (AppError, bool)> {
        let response = self
            .http_client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to send request to Resend API");
                // Network errors are transient
                (
                    AppError::Internal(format!("Email service error: {}", e)),
                    true,
                )
            })?;

        let status = response.status();

        if status.is_success() {
            let _result: ResendEmailResponse = response.json().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to parse Resend API response");
                (AppError::Internal("Email service response error".into()), false)
            })?;
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            let is_transient = status.as_u16() == 429 || status.is_server_error();

            if is_transient {
                tracing::warn!(status = %status, body = %body, "Resend API returned transient error");
            } else {
                tracing::error!(status = %status, body = %body, "Resend API returned non-transient error");
            }

            Err((
                AppError::Internal(format!("Email service error: {} - {}", status, body)),
                is_transient,
            ))
        }
    }
}
