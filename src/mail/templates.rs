//! Message bodies for account mail.

/// A rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub html_body: String,
}

pub fn welcome(full_name: &str, public_url: &str) -> Message {
    let name = if full_name.trim().is_empty() {
        "there".to_string()
    } else {
        escape(full_name)
    };
    Message {
        subject: "Welcome!".to_string(),
        html_body: format!(
            "<p>Hi {name},</p>\
             <p>Your account is ready. Sign in at <a href=\"{url}\">{url}</a>.</p>",
            url = escape(public_url),
        ),
    }
}

pub fn password_reset(code: &str, valid_minutes: u64) -> Message {
    Message {
        subject: "Password Reset Request".to_string(),
        html_body: format!(
            "<p>Your password reset code is <strong>{}</strong>.</p>\
             <p>It expires in {valid_minutes} minutes. If you did not ask for it, \
             ignore this message.</p>",
            escape(code),
        ),
    }
}

fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_escaped() {
        let msg = welcome("<script>alert(1)</script>", "https://app.example.com");
        assert!(!msg.html_body.contains("<script>"));
        assert!(msg.html_body.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_reset_mentions_code_and_expiry() {
        let msg = password_reset("042137", 15);
        assert!(msg.html_body.contains("042137"));
        assert!(msg.html_body.contains("15 minutes"));
    }
}
