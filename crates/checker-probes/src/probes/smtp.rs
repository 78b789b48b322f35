//! SMTP probe.
//!
//! Drives a `lettre` client connection through just enough of the
//! dialogue to prove a relay is accepting mail:
//!
//! ```text
//! ◄── 220 greeting
//! ──► EHLO            ◄── 250
//! ──► STARTTLS        ◄── 220   (--encryption; EHLO again over TLS)
//! ──► AUTH            ◄── 235   (--username and --password; PLAIN or LOGIN)
//! ──► MAIL/RCPT/DATA  ◄── 250   (--from and --to), otherwise NOOP
//! ──► QUIT
//! ```
//!
//! The rendered text is the last line of the reply to the command before
//! `QUIT`, so the default pattern `250.*` checks that the server accepted
//! the message (or the `NOOP`).

use std::io::Write;
use std::time::Duration;

use lettre::Message;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{SmtpConnection, TlsParameters};
use lettre::transport::smtp::commands::Noop;
use lettre::transport::smtp::extension::ClientId;
use lettre::transport::smtp::response::Response;
use regex::Regex;
use tracing::debug;

use checker_core::{
    CheckResult, ParameterSpec, ProbeError, ProbeOutcome, ResolvedOptions, evaluate,
};

use crate::probe::HealthProbe;

const HOSTNAME: &str = "hostname";
const PORT: &str = "port";
const ENCRYPTION: &str = "encryption";
const USERNAME: &str = "username";
const PASSWORD: &str = "password";
const FROM: &str = "from";
const TO: &str = "to";
const SUBJECT: &str = "subject";
const BODY: &str = "body";

/// Offered in this order; the first one the server advertises wins.
const MECHANISMS: &[Mechanism] = &[Mechanism::Plain, Mechanism::Login];

pub static PARAMETERS: &[ParameterSpec] = &[
    ParameterSpec::new('h', HOSTNAME, "The hostname of the SMTP server").required(),
    ParameterSpec::new('p', PORT, "The port of the SMTP server").with_default("25"),
    ParameterSpec::new('e', ENCRYPTION, "Upgrade the connection with STARTTLS (true, false)")
        .with_default("false"),
    ParameterSpec::connect_timeout(
        'c',
        "The connection timeout of the SMTP server (in milliseconds)",
    ),
    ParameterSpec::response_timeout(
        'r',
        "The response timeout of the SMTP server (in milliseconds)",
    ),
    ParameterSpec::new('u', USERNAME, "The username for the SMTP server"),
    ParameterSpec::new('w', PASSWORD, "The password for the SMTP server"),
    ParameterSpec::new('f', FROM, "The sender address of the test message"),
    ParameterSpec::new('t', TO, "The recipient address of the test message"),
    ParameterSpec::new('s', SUBJECT, "The subject of the test message"),
    ParameterSpec::new('b', BODY, "The body of the test message"),
    ParameterSpec::pattern('x', "The regex pattern to search in the SMTP server response", "250.*"),
];

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub hostname: String,
    pub port: u16,
    pub starttls: bool,
    pub credentials: Option<(String, String)>,
    /// Sender and recipient; `None` means check with `NOOP` instead.
    pub envelope: Option<(String, String)>,
    pub subject: String,
    pub body: String,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    pub pattern: Regex,
}

impl SmtpSettings {
    pub fn from_options(options: &ResolvedOptions) -> CheckResult<Self> {
        let credentials = match (options.get(USERNAME), options.get(PASSWORD)) {
            (Some(user), Some(password)) => Some((user.to_string(), password.to_string())),
            _ => None,
        };
        let envelope = match (options.get(FROM), options.get(TO)) {
            (Some(from), Some(to)) => Some((from.to_string(), to.to_string())),
            _ => None,
        };

        Ok(Self {
            hostname: options.require(HOSTNAME)?.to_string(),
            port: options.parse::<u16>(PORT)?.unwrap_or(25),
            starttls: options.flag(ENCRYPTION)?,
            credentials,
            envelope,
            subject: options.get(SUBJECT).unwrap_or_default().to_string(),
            body: options.get(BODY).unwrap_or_default().to_string(),
            connect_timeout: options.connect_timeout()?,
            response_timeout: options.response_timeout()?,
            pattern: options.pattern()?,
        })
    }

    /// Plain-text test message from `from` to `to`.
    pub fn message(&self, from: &str, to: &str) -> CheckResult<Message> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| ProbeError::invalid_option(FROM, from, e))?;
        let to: Mailbox = to
            .parse()
            .map_err(|e| ProbeError::invalid_option(TO, to, e))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(self.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(self.body.clone())
            .map_err(|e| ProbeError::connection(format!("cannot build test message: {e}")))
    }
}

/// `250 2.0.0 Ok`: the reply code followed by the final text line.
pub fn last_line(response: &Response) -> String {
    match response.message().last() {
        Some(line) if !line.is_empty() => format!("{} {line}", response.code()),
        _ => response.code().to_string(),
    }
}

/// Run the SMTP dialogue and return the reply to the last command before `QUIT`.
pub fn converse(settings: &SmtpSettings) -> CheckResult<Response> {
    let client_id = ClientId::default();
    let mut connection = SmtpConnection::connect(
        (settings.hostname.as_str(), settings.port),
        Some(settings.connect_timeout),
        &client_id,
        None,
        None,
    )
    .map_err(ProbeError::connection)?;
    connection
        .set_timeout(Some(settings.response_timeout))
        .map_err(|e| ProbeError::connection(format!("set timeouts: {e}")))?;
    debug!(host = %settings.hostname, port = settings.port, "smtp session established");

    if settings.starttls {
        if !connection.can_starttls() {
            return Err(ProbeError::connection("server does not advertise STARTTLS"));
        }
        super::install_crypto_provider();
        let parameters =
            TlsParameters::new(settings.hostname.clone()).map_err(ProbeError::connection)?;
        connection
            .starttls(&parameters, &client_id)
            .map_err(ProbeError::connection)?;
        debug!("connection upgraded to tls");
    }

    if let Some((username, password)) = &settings.credentials {
        let credentials = Credentials::new(username.clone(), password.clone());
        connection
            .auth(MECHANISMS, &credentials)
            .map_err(ProbeError::connection)?;
        debug!(username = %username, "smtp authentication accepted");
    }

    let last = match &settings.envelope {
        Some((from, to)) => {
            let message = settings.message(from, to)?;
            connection
                .send(message.envelope(), &message.formatted())
                .map_err(ProbeError::connection)?
        }
        None => connection.command(Noop).map_err(ProbeError::connection)?,
    };

    if let Err(e) = connection.quit() {
        debug!(error = %e, "QUIT failed");
    }
    Ok(last)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmtpProbe;

impl HealthProbe for SmtpProbe {
    fn parameters(&self) -> &'static [ParameterSpec] {
        PARAMETERS
    }

    fn check(
        &self,
        options: &ResolvedOptions,
        console: &mut dyn Write,
    ) -> CheckResult<ProbeOutcome> {
        let settings = SmtpSettings::from_options(options)?;
        let response = converse(&settings)?;
        evaluate(last_line(&response), &settings.pattern, console)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    /// Scripted SMTP server. Each step is (expected command prefix, reply).
    /// A step whose prefix is `.` swallows the message up to the
    /// terminating dot. Returns every line the client sent.
    fn serve(
        greeting: &'static str,
        script: Vec<(&'static str, &'static str)>,
    ) -> (u16, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            let mut seen = Vec::new();
            writer.write_all(greeting.as_bytes()).unwrap();

            for (prefix, reply) in script {
                let mut line = String::new();
                loop {
                    line.clear();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 {
                        return seen;
                    }
                    let trimmed = line.trim_end().to_string();
                    seen.push(trimmed.clone());
                    if prefix != "." || trimmed == "." {
                        break;
                    }
                }
                assert!(line.starts_with(prefix), "expected {prefix}, got {line}");
                writer.write_all(reply.as_bytes()).unwrap();
            }
            seen
        });
        (port, handle)
    }

    fn options(port: u16) -> ResolvedOptions {
        ResolvedOptions::new(PARAMETERS)
            .with(HOSTNAME, "127.0.0.1")
            .with(PORT, port.to_string())
    }

    #[test]
    fn noop_reports_last_reply_line() {
        let (port, server) = serve(
            "220 mail.test ESMTP\r\n",
            vec![
                ("EHLO ", "250-mail.test\r\n250 SIZE 1000\r\n"),
                ("NOOP", "250 2.0.0 Ok\r\n"),
                ("QUIT", "221 2.0.0 Bye\r\n"),
            ],
        );
        let mut console = Vec::new();
        let outcome = SmtpProbe.check(&options(port), &mut console).unwrap();
        assert!(outcome.matched);
        assert_eq!(outcome.raw_response_text, "250 2.0.0 Ok");
        assert_eq!(String::from_utf8(console).unwrap(), "250 2.0.0 Ok\n");

        let seen = server.join().unwrap();
        assert!(seen[0].starts_with("EHLO "));
        assert_eq!(&seen[1..], ["NOOP", "QUIT"]);
    }

    #[test]
    fn message_is_sent_with_auth_plain() {
        let (port, server) = serve(
            "220 mail.test ESMTP\r\n",
            vec![
                ("EHLO", "250-mail.test\r\n250 AUTH PLAIN LOGIN\r\n"),
                ("AUTH PLAIN", "235 2.7.0 Authentication successful\r\n"),
                ("MAIL FROM:<sender@test>", "250 2.1.0 Ok\r\n"),
                ("RCPT TO:<ops@test>", "250 2.1.5 Ok\r\n"),
                ("DATA", "354 End data with <CR><LF>.<CR><LF>\r\n"),
                (".", "250 2.0.0 Ok: queued as 12345\r\n"),
                ("QUIT", "221 2.0.0 Bye\r\n"),
            ],
        );
        let options = options(port)
            .with(USERNAME, "user")
            .with(PASSWORD, "pass")
            .with(FROM, "sender@test")
            .with(TO, "ops@test")
            .with(SUBJECT, "ping")
            .with(BODY, "hello\n.hidden");
        let outcome = SmtpProbe.check(&options, &mut Vec::new()).unwrap();
        assert_eq!(outcome.raw_response_text, "250 2.0.0 Ok: queued as 12345");

        let seen = server.join().unwrap();
        assert!(seen.contains(&"AUTH PLAIN AHVzZXIAcGFzcw==".to_string()));
        assert!(seen.contains(&"Subject: ping".to_string()));
        assert!(seen.contains(&"..hidden".to_string()), "body lines are dot-stuffed");
        assert_eq!(seen.last().map(String::as_str), Some("QUIT"));
    }

    #[test]
    fn login_only_server_negotiates_auth_login() {
        let (port, server) = serve(
            "220 mail.test ESMTP\r\n",
            vec![
                ("EHLO", "250-mail.test\r\n250 AUTH LOGIN\r\n"),
                ("AUTH LOGIN", "334 VXNlcm5hbWU6\r\n"),
                ("dXNlcg==", "334 UGFzc3dvcmQ6\r\n"),
                ("cGFzcw==", "235 2.7.0 Authentication successful\r\n"),
                ("NOOP", "250 2.0.0 Ok\r\n"),
                ("QUIT", "221 2.0.0 Bye\r\n"),
            ],
        );
        let options = options(port).with(USERNAME, "user").with(PASSWORD, "pass");
        let outcome = SmtpProbe.check(&options, &mut Vec::new()).unwrap();
        assert!(outcome.matched);
        assert_eq!(outcome.raw_response_text, "250 2.0.0 Ok");

        let seen = server.join().unwrap();
        assert!(!seen.iter().any(|line| line.starts_with("AUTH PLAIN")));
        assert!(seen.contains(&"AUTH LOGIN".to_string()));
    }

    #[test]
    fn rejected_recipient_is_a_connection_error() {
        let (port, _server) = serve(
            "220 mail.test ESMTP\r\n",
            vec![
                ("EHLO", "250 mail.test\r\n"),
                ("MAIL FROM", "250 Ok\r\n"),
                ("RCPT TO", "550 5.1.1 No such user\r\n"),
            ],
        );
        let options = options(port).with(FROM, "sender@test").with(TO, "nobody@test");
        let err = SmtpProbe.check(&options, &mut Vec::new()).unwrap_err();
        match err {
            ProbeError::Connection(message) => assert!(message.contains("550"), "{message}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn refused_greeting_is_a_connection_error() {
        let (port, _server) = serve("421 too busy\r\n", Vec::new());
        let err = SmtpProbe.check(&options(port), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, ProbeError::Connection(_)));
    }

    #[test]
    fn starttls_requires_server_support() {
        let (port, _server) = serve(
            "220 mail.test ESMTP\r\n",
            vec![("EHLO", "250 mail.test\r\n")],
        );
        let options = options(port).with(ENCRYPTION, "true");
        let err = SmtpProbe.check(&options, &mut Vec::new()).unwrap_err();
        match err {
            ProbeError::Connection(message) => assert!(message.contains("STARTTLS")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn custom_pattern_can_fail_a_positive_reply() {
        let (port, _server) = serve(
            "220 mail.test ESMTP\r\n",
            vec![
                ("EHLO", "250 mail.test\r\n"),
                ("NOOP", "250 2.0.0 Ok\r\n"),
                ("QUIT", "221 Bye\r\n"),
            ],
        );
        let options = options(port).with("pattern", "queued");
        let err = SmtpProbe.check(&options, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, ProbeError::PatternMismatch(_)));
    }

    #[test]
    fn malformed_sender_is_an_invalid_option() {
        let options = ResolvedOptions::new(PARAMETERS).with(HOSTNAME, "mail.internal");
        let settings = SmtpSettings::from_options(&options).unwrap();
        let err = settings.message("not an address", "ops@test").unwrap_err();
        assert!(matches!(err, ProbeError::InvalidOption { ref option, .. } if option == FROM));
    }

    #[test]
    fn settings_defaults() {
        let options = ResolvedOptions::new(PARAMETERS).with(HOSTNAME, "mail.internal");
        let settings = SmtpSettings::from_options(&options).unwrap();
        assert_eq!(settings.port, 25);
        assert!(!settings.starttls);
        assert!(settings.credentials.is_none());
        assert!(settings.envelope.is_none());
        assert_eq!(settings.pattern.as_str(), "250.*");
    }

    #[test]
    fn username_without_password_skips_auth() {
        let options = ResolvedOptions::new(PARAMETERS)
            .with(HOSTNAME, "mail.internal")
            .with(USERNAME, "user")
            .with(ENCRYPTION, "TRUE");
        let settings = SmtpSettings::from_options(&options).unwrap();
        assert!(settings.credentials.is_none());
        assert!(settings.starttls);
    }
}
