//! Helpers for server command-line arguments.
//!
//! Flags may be written either as `--flag value` or `--flag=value`.

/// Index and value of `flag`, if present.
fn locate(args: &[String], flag: &str) -> Option<(usize, Option<String>)> {
    args.iter().enumerate().find_map(|(i, arg)| {
        if arg == flag {
            Some((i, args.get(i + 1).cloned()))
        } else {
            arg.strip_prefix(flag)
                .and_then(|rest| rest.strip_prefix('='))
                .map(|value| (i, Some(value.to_string())))
        }
    })
}

/// Returns the value of `flag`, if present with a value.
pub fn find_arg(args: &[String], flag: &str) -> Option<String> {
    locate(args, flag).and_then(|(_, value)| value)
}

/// Whether `flag` appears in either form.
pub fn has_arg(args: &[String], flag: &str) -> bool {
    locate(args, flag).is_some()
}

/// Sets `flag` to `value`, replacing an existing occurrence in place.
pub fn set_arg(args: &mut Vec<String>, flag: &str, value: &str) {
    match locate(args, flag) {
        Some((i, _)) if args[i] == flag => {
            if i + 1 < args.len() {
                args[i + 1] = value.to_string();
            } else {
                args.push(value.to_string());
            }
        }
        Some((i, _)) => args[i] = format!("{flag}={value}"),
        None => {
            args.push(flag.to_string());
            args.push(value.to_string());
        }
    }
}

/// Sets `flag` to `value` unless it is already present.
pub fn ensure_arg(args: &mut Vec<String>, flag: &str, value: &str) {
    if !has_arg(args, flag) {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}

/// Removes every occurrence of `flag` together with its value.
pub fn remove_arg(args: &mut Vec<String>, flag: &str) {
    while let Some((i, _)) = locate(args, flag) {
        if args[i] == flag && i + 1 < args.len() {
            args.drain(i..=i + 1);
        } else {
            args.remove(i);
        }
    }
}

/// Appends a valueless switch unless it is already present.
pub fn ensure_switch(args: &mut Vec<String>, switch: &str) {
    if !args.iter().any(|arg| arg == switch) {
        args.push(switch.to_string());
    }
}
