use async_trait::async_trait;
use common::{BridgeError, BridgeResult, VerificationChallenge};
use std::io::{self, BufRead, Write};

/// Supplies the one-time code for a login challenge. Keeps console
/// interaction out of the login logic.
#[async_trait]
pub trait VerificationPrompt: Send + Sync {
    async fn verification_code(&self, challenge: &VerificationChallenge) -> BridgeResult<String>;
}

/// Asks on the terminal.
pub struct ConsolePrompt;

#[async_trait]
impl VerificationPrompt for ConsolePrompt {
    async fn verification_code(&self, challenge: &VerificationChallenge) -> BridgeResult<String> {
        let message = challenge
            .message
            .clone()
            .unwrap_or_else(|| "A verification code was sent to your email or phone.".to_string());

        let code = tokio::task::spawn_blocking(move || -> io::Result<String> {
            let mut stdout = io::stdout();
            writeln!(stdout, "{message}")?;
            write!(stdout, "Enter verification code: ")?;
            stdout.flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok(line.trim().to_string())
        })
        .await
        .map_err(|e| BridgeError::Protocol(format!("verification prompt aborted: {e}")))??;

        if code.is_empty() {
            return Err(BridgeError::VerificationRequired);
        }
        Ok(code)
    }
}

/// Code supplied up front through config or environment.
pub struct StaticCode(pub String);

#[async_trait]
impl VerificationPrompt for StaticCode {
    async fn verification_code(&self, _challenge: &VerificationChallenge) -> BridgeResult<String> {
        Ok(self.0.trim().to_string())
    }
}

/// Fails every challenge; used when no terminal is attached.
pub struct NoPrompt;

#[async_trait]
impl VerificationPrompt for NoPrompt {
    async fn verification_code(&self, _challenge: &VerificationChallenge) -> BridgeResult<String> {
        Err(BridgeError::VerificationRequired)
    }
}
