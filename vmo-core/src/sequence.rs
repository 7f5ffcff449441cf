//! Stable naming of per-replica storage claims
//!
//! Claims are bound to replica ordinals by position. Names are only ever appended or
//! truncated from the tail, so a name handed out once keeps pointing at the same volume.

/// Successor of `name` in a human-style sequence
///
/// The trailing run of ASCII digits is incremented like a decimal number, carrying into
/// new digits as needed (`data-9` -> `data-10`, `pvc-099` -> `pvc-100`). A name without
/// a trailing number starts a new sequence (`data` -> `data-1`).
pub fn next_in_sequence(name: &str) -> String {
    let digits_start = name
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);
    let Some(start) = digits_start else {
        return format!("{name}-1");
    };

    let (prefix, number) = name.split_at(start);
    let mut digits = number.as_bytes().to_vec();
    let mut carry = true;
    for digit in digits.iter_mut().rev() {
        if !carry {
            break;
        }
        if *digit == b'9' {
            *digit = b'0';
        } else {
            *digit += 1;
            carry = false;
        }
    }
    let mut next = String::with_capacity(name.len() + 1);
    next.push_str(prefix);
    if carry {
        next.push('1');
    }
    // only ascii digits were touched
    next.extend(digits.into_iter().map(char::from));
    next
}

/// Resize a claim-name sequence to `desired` entries
///
/// An empty `existing` sequence starts at `first`. A short sequence is extended with
/// successors of its last name, a long one is truncated from the tail. Existing names are
/// never changed.
pub fn ensure_claim_names(existing: &[String], desired: usize, first: &str) -> Vec<String> {
    let mut names: Vec<String> = existing.iter().take(desired).cloned().collect();
    if desired == 0 {
        return names;
    }
    if names.is_empty() {
        names.push(first.to_string());
    }
    while names.len() < desired {
        let next = next_in_sequence(&names[names.len() - 1]);
        names.push(next);
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn successor_increments_trailing_number() {
        assert_eq!(next_in_sequence("data-0"), "data-1");
        assert_eq!(next_in_sequence("data-9"), "data-10");
        assert_eq!(next_in_sequence("pvc-099"), "pvc-100");
        assert_eq!(next_in_sequence("pvc99"), "pvc100");
    }

    #[test]
    fn successor_starts_new_sequence_without_number() {
        assert_eq!(next_in_sequence("vmi-system-prometheus"), "vmi-system-prometheus-1");
        assert_eq!(next_in_sequence(""), "-1");
    }

    #[test]
    fn synthesizes_from_first_name() {
        assert_eq!(
            ensure_claim_names(&[], 3, "data-0"),
            strings(&["data-0", "data-1", "data-2"])
        );
        assert_eq!(
            ensure_claim_names(&[], 2, "vmi-system-es-data"),
            strings(&["vmi-system-es-data", "vmi-system-es-data-1"])
        );
    }

    #[test]
    fn truncates_from_the_tail() {
        let existing = strings(&["data-0", "data-1", "data-2"]);
        assert_eq!(ensure_claim_names(&existing, 2, "data-0"), strings(&["data-0", "data-1"]));
        assert!(ensure_claim_names(&existing, 0, "data-0").is_empty());
    }

    #[test]
    fn grows_from_last_name_without_renumbering() {
        let existing = strings(&["data-0", "data-9"]);
        let grown = ensure_claim_names(&existing, 11, "data-0");
        assert_eq!(grown.len(), 11);
        assert_eq!(grown[0], "data-0");
        assert_eq!(grown[1], "data-9");
        assert_eq!(grown[2], "data-10");
        assert_eq!(grown[10], "data-18");
    }

    #[test]
    fn stable_under_repeated_calls() {
        let once = ensure_claim_names(&[], 4, "data-0");
        let twice = ensure_claim_names(&once, 4, "data-0");
        assert_eq!(once, twice);
    }
}
