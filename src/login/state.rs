use serde::{Deserialize, Serialize};
use std::fmt;

/// Every page of the sign-in flow the machine knows how to recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    EmailInput,
    PasswordInput,
    #[serde(rename = "totp_2fa")]
    Totp2FA,
    Passwordless,
    GetACode,
    RecoveryEmail,
    OtpCodeEntry,
    StaySignedIn,
    LoggedIn,
    AuthBlocked,
}

impl LoginState {
    pub const ALL: [LoginState; 10] = [
        LoginState::EmailInput,
        LoginState::PasswordInput,
        LoginState::Totp2FA,
        LoginState::Passwordless,
        LoginState::GetACode,
        LoginState::RecoveryEmail,
        LoginState::OtpCodeEntry,
        LoginState::StaySignedIn,
        LoginState::LoggedIn,
        LoginState::AuthBlocked,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, LoginState::LoggedIn | LoginState::AuthBlocked)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoginState::EmailInput => "email_input",
            LoginState::PasswordInput => "password_input",
            LoginState::Totp2FA => "totp_2fa",
            LoginState::Passwordless => "passwordless",
            LoginState::GetACode => "get_a_code",
            LoginState::RecoveryEmail => "recovery_email",
            LoginState::OtpCodeEntry => "otp_code_entry",
            LoginState::StaySignedIn => "stay_signed_in",
            LoginState::LoggedIn => "logged_in",
            LoginState::AuthBlocked => "auth_blocked",
        }
    }
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_logged_in_and_blocked_are_terminal() {
        let terminal: Vec<_> = LoginState::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![&LoginState::LoggedIn, &LoginState::AuthBlocked]
        );
    }

    #[test]
    fn serde_names_match_display() {
        for state in LoginState::ALL {
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json, serde_json::Value::String(state.to_string()));
        }
    }
}
