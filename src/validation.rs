//! Input validation rules shared by the server handlers and the client.
//!
//! Each rule returns the user-facing message of the first violated
//! constraint, so the client can reject a form before any request is sent
//! and the server answers the same text with a 400.

use std::sync::OnceLock;

use regex::Regex;
use validator::ValidateEmail;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const STRONG_PASSWORD_LEN: usize = 8;
pub const MAX_MESSAGE_LEN: usize = 1000;
pub const MAX_BIO_LEN: usize = 500;

const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

pub type ValidationResult = Result<(), String>;

fn username_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid username regex"))
}

fn required(value: &str, message: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(message.to_string());
    }
    Ok(())
}

pub fn validate_username(username: &str) -> ValidationResult {
    let username = username.trim();
    required(username, "Username is required")?;
    let len = username.chars().count();
    if len < 3 {
        return Err("Username must be at least 3 characters long".to_string());
    }
    if len > 50 {
        return Err("Username must be less than 50 characters".to_string());
    }
    if !username_pattern().is_match(username) {
        return Err("Username can only contain letters, numbers, and underscores".to_string());
    }
    Ok(())
}

pub fn validate_email(email: &str) -> ValidationResult {
    let email = email.trim();
    required(email, "Email is required")?;
    // `validate_email` accepts dotless domains; the web client requires a dot.
    let domain_has_dot = email
        .rsplit_once('@')
        .map(|(_, domain)| domain.contains('.') && !domain.ends_with('.'))
        .unwrap_or(false);
    if !email.validate_email() || !domain_has_dot {
        return Err("Invalid email format".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> ValidationResult {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!("Password must be at least {} characters long", MIN_PASSWORD_LEN));
    }
    Ok(())
}

/// Stricter rule applied when a password is set through a reset link.
pub fn validate_strong_password(password: &str) -> ValidationResult {
    if password.chars().count() < STRONG_PASSWORD_LEN {
        return Err(format!("Password must be at least {} characters long", STRONG_PASSWORD_LEN));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return Err("Password must contain at least one uppercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return Err("Password must contain at least one lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one number".to_string());
    }
    if !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        return Err("Password must contain at least one special character".to_string());
    }
    Ok(())
}

pub fn validate_confirmation(password: &str, confirmation: &str) -> ValidationResult {
    if password != confirmation {
        return Err("Passwords do not match".to_string());
    }
    Ok(())
}

pub fn validate_login(username_or_email: &str, password: &str) -> ValidationResult {
    required(username_or_email, "Username or email is required")?;
    if password.is_empty() {
        return Err("Password is required".to_string());
    }
    Ok(())
}

pub fn validate_registration(
    username: &str,
    email: &str,
    password: &str,
    confirm_password: Option<&str>,
) -> ValidationResult {
    validate_username(username)?;
    validate_email(email)?;
    validate_password(password)?;
    if let Some(confirm) = confirm_password {
        validate_confirmation(password, confirm)?;
    }
    Ok(())
}

pub fn validate_password_change(
    current_password: &str,
    new_password: &str,
    confirm_new_password: &str,
) -> ValidationResult {
    if current_password.is_empty() {
        return Err("Current password is required".to_string());
    }
    if new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "New password must be at least {} characters long",
            MIN_PASSWORD_LEN
        ));
    }
    if new_password != confirm_new_password {
        return Err("New passwords do not match".to_string());
    }
    Ok(())
}

/// Returns the trimmed message to classify.
pub fn validate_message(message: &str) -> Result<&str, String> {
    let message = message.trim();
    if message.is_empty() {
        return Err("Message is required".to_string());
    }
    if message.chars().count() > MAX_MESSAGE_LEN {
        return Err(format!(
            "Message too long. Maximum {} characters allowed.",
            MAX_MESSAGE_LEN
        ));
    }
    Ok(message)
}

pub fn validate_bio(bio: &str) -> ValidationResult {
    if bio.trim().chars().count() > MAX_BIO_LEN {
        return Err(format!("Bio must be less than {} characters", MAX_BIO_LEN));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_rules() {
        assert!(validate_username("demo_user1").is_ok());
        assert_eq!(validate_username("").unwrap_err(), "Username is required");
        assert_eq!(
            validate_username("ab").unwrap_err(),
            "Username must be at least 3 characters long"
        );
        assert!(validate_username(&"a".repeat(51)).is_err());
        assert!(validate_username("bad name").is_err());
        assert!(validate_username("bad-name").is_err());
    }

    #[test]
    fn test_email_rules() {
        assert!(validate_email("demo@example.com").is_ok());
        assert!(validate_email("  demo@example.com ").is_ok());
        assert_eq!(validate_email("").unwrap_err(), "Email is required");
        assert!(validate_email("demo").is_err());
        assert!(validate_email("demo@localhost").is_err());
        assert!(validate_email("@example.com").is_err());
    }

    #[test]
    fn test_password_minimum_length() {
        assert!(validate_password("secret").is_ok());
        assert_eq!(
            validate_password("12345").unwrap_err(),
            "Password must be at least 6 characters long"
        );
        assert_eq!(validate_password("").unwrap_err(), "Password is required");
    }

    #[test]
    fn test_strong_password() {
        assert!(validate_strong_password("Str0ng!pass").is_ok());
        assert!(validate_strong_password("short1!").is_err());
        assert!(validate_strong_password("alllowercase1!").is_err());
        assert!(validate_strong_password("ALLUPPERCASE1!").is_err());
        assert!(validate_strong_password("NoDigitsHere!").is_err());
        assert!(validate_strong_password("NoSpecial123").is_err());
    }

    #[test]
    fn test_registration_checks_confirmation() {
        assert!(validate_registration("alice", "alice@example.com", "secret1", Some("secret1")).is_ok());
        assert_eq!(
            validate_registration("alice", "alice@example.com", "secret1", Some("secret2")).unwrap_err(),
            "Passwords do not match"
        );
        assert!(validate_registration("alice", "alice@example.com", "secret1", None).is_ok());
    }

    #[test]
    fn test_password_change_rules() {
        assert!(validate_password_change("old", "newpass", "newpass").is_ok());
        assert_eq!(
            validate_password_change("old", "short", "short").unwrap_err(),
            "New password must be at least 6 characters long"
        );
        assert_eq!(
            validate_password_change("old", "newpass", "newpas2").unwrap_err(),
            "New passwords do not match"
        );
        assert!(validate_password_change("", "newpass", "newpass").is_err());
    }

    #[test]
    fn test_message_rules() {
        assert_eq!(validate_message("  hello  ").unwrap(), "hello");
        assert_eq!(validate_message("   ").unwrap_err(), "Message is required");
        assert!(validate_message(&"x".repeat(MAX_MESSAGE_LEN)).is_ok());
        assert!(validate_message(&"x".repeat(MAX_MESSAGE_LEN + 1)).is_err());
    }

    #[test]
    fn test_login_requires_both_fields() {
        assert!(validate_login("demo", "demo123").is_ok());
        assert_eq!(validate_login(" ", "x").unwrap_err(), "Username or email is required");
        assert_eq!(validate_login("demo", "").unwrap_err(), "Password is required");
    }
}
