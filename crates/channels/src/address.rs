/// Suffix of a fully-qualified WhatsApp user address.
pub const USER_ADDRESS_SUFFIX: &str = "@c.us";

/// Turn a bare phone number into a fully-qualified address.
///
/// Anything already containing `@` (user or group address) is returned
/// trimmed but otherwise untouched. A leading `+` is dropped from bare
/// numbers.
#[must_use]
pub fn normalize_recipient(recipient: &str) -> String {
    let trimmed = recipient.trim();
    if trimmed.contains('@') {
        return trimmed.to_string();
    }
    let bare = trimmed.strip_prefix('+').unwrap_or(trimmed);
    format!("{bare}{USER_ADDRESS_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_number_gets_suffix() {
        assert_eq!(normalize_recipient("6281234567"), "6281234567@c.us");
        assert_eq!(normalize_recipient(" +6281234567 "), "6281234567@c.us");
    }

    #[test]
    fn qualified_address_is_kept() {
        assert_eq!(normalize_recipient("6281234567@c.us"), "6281234567@c.us");
        assert_eq!(
            normalize_recipient("120363025@g.us"),
            "120363025@g.us"
        );
    }
}
