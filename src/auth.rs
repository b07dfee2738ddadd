use std::io::{self, BufRead, IsTerminal};
use std::path::Path;

use anyhow::{Context, Result, bail};
use kdbx_codec::CompositeKey;
use zeroize::Zeroizing;

pub const PASSWORD_ENV: &str = "KDBX_PASSWORD";

/// Password for an existing database: environment, piped stdin, then a TTY prompt.
pub fn read_password() -> Result<Zeroizing<String>> {
    //  KDBX_PASSWORD="supersecret" kdbx-codec get mail
    if let Some(pw) = password_from_env() {
        return Ok(pw);
    }

    //  echo "supersecret" | kdbx-codec get mail
    if !io::stdin().is_terminal() {
        let mut buf = Zeroizing::new(String::new());
        io::stdin().read_line(&mut buf)?;
        trim_newline(&mut buf);

        if !buf.is_empty() {
            return Ok(buf);
        }
    }

    if io::stdin().is_terminal() {
        let pw = Zeroizing::new(rpassword::prompt_password("Password: ")?);
        if !pw.is_empty() {
            return Ok(pw);
        }
    }

    bail!("No password provided")
}

/// Password for a new database. Piped input must repeat the password on a second line.
pub fn read_new_password_with_confirmation() -> Result<Zeroizing<String>> {
    if let Some(pw) = password_from_env() {
        return Ok(pw);
    }

    let (pw1, pw2) = if io::stdin().is_terminal() {
        (
            Zeroizing::new(rpassword::prompt_password("New password: ")?),
            Zeroizing::new(rpassword::prompt_password("Confirm password: ")?),
        )
    } else {
        let stdin = io::stdin();
        let mut handle = stdin.lock();

        let mut pw1 = Zeroizing::new(String::new());
        let mut pw2 = Zeroizing::new(String::new());
        handle.read_line(&mut pw1)?;
        handle.read_line(&mut pw2)?;
        trim_newline(&mut pw1);
        trim_newline(&mut pw2);
        (pw1, pw2)
    };

    if pw1.is_empty() {
        bail!("password cannot be empty");
    }
    if pw1 != pw2 {
        bail!("passwords do not match");
    }
    Ok(pw1)
}

/// Combines the password with an optional key file.
pub fn composite_key(password: &str, key_file: Option<&Path>) -> Result<CompositeKey> {
    let key = CompositeKey::from_password(password);
    match key_file {
        None => Ok(key),
        Some(path) => {
            let contents = Zeroizing::new(
                std::fs::read(path)
                    .with_context(|| format!("failed to read key file {}", path.display()))?,
            );
            Ok(key.with_key_file(&contents))
        }
    }
}

fn password_from_env() -> Option<Zeroizing<String>> {
    std::env::var(PASSWORD_ENV)
        .ok()
        .filter(|pw| !pw.is_empty())
        .map(Zeroizing::new)
}

fn trim_newline(s: &mut String) {
    while s.ends_with('\n') || s.ends_with('\r') {
        s.pop();
    }
}
