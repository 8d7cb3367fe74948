use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use tracing::warn;

use presente_core::models::{Profile, SignupRequest};
use presente_core::utils::{format_long_date, format_optional, parse_query_date, truncate_string};
use presente_core::validation::{validate_login, validate_signup, ValidationErrors};
use presente_core::{ApiError, AuthProvider, Config};

/// Width of the name column in listings
const NAME_WIDTH: usize = 32;

/// Open the configured store and restore any saved session.
pub async fn start(config: &Config) -> Result<AuthProvider> {
    let store = config.open_store()?;
    let api = config.build_client(store)?;
    AuthProvider::start(api).await.map_err(api_error)
}

fn api_error(e: ApiError) -> anyhow::Error {
    if e.requires_login() {
        anyhow::anyhow!("{} Run `presente login`.", e.user_message())
    } else {
        anyhow::anyhow!(e.user_message())
    }
}

fn invalid(errors: ValidationErrors) -> anyhow::Error {
    let lines: Vec<String> = errors.0.iter().map(|e| format!("  {}", e)).collect();
    anyhow::anyhow!("Please fix the following:\n{}", lines.join("\n"))
}

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn require_session(provider: &AuthProvider) -> Result<()> {
    if !provider.is_authenticated() {
        bail!("Not signed in. Run `presente login`.");
    }
    Ok(())
}

pub async fn login(provider: &AuthProvider, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email")?,
    };
    let password = rpassword::prompt_password("Password: ")?;
    validate_login(&email, &password).map_err(invalid)?;

    let state = provider.login(email.trim(), &password).await.map_err(api_error)?;

    config.last_email = Some(email.trim().to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!(
        "Signed in as {} ({})",
        format_optional(&state.display_name, "unknown"),
        format_optional(&state.role, "no role")
    );
    Ok(())
}

pub async fn register(provider: &AuthProvider) -> Result<()> {
    let signup = SignupRequest {
        email: prompt("Email")?,
        password: rpassword::prompt_password("Password: ")?,
        firstname: prompt("First name")?,
        lastname: prompt("Last name")?,
        date_of_birth: prompt("Date of birth (YYYY-MM-DD)")?,
        gender: prompt("Gender")?,
        phone_number: prompt("Phone number")?,
        document_type: prompt("Document type")?,
        document_number: prompt("Document number")?,
        user_type: prompt("User type")?,
    };
    validate_signup(&signup).map_err(invalid)?;

    let body = provider.register(&signup).await.map_err(api_error)?;
    println!("Account created. Sign in with `presente login --email {}`.", signup.email);
    if !body.is_null() {
        println!("{}", serde_json::to_string_pretty(&body)?);
    }
    Ok(())
}

pub async fn logout(provider: &AuthProvider) -> Result<()> {
    provider.logout().await.map_err(api_error)?;
    println!("Signed out.");
    Ok(())
}

pub fn status(provider: &AuthProvider) -> Result<()> {
    let state = provider.auth_state();
    if state.authenticated != Some(true) {
        println!("Not signed in.");
        return Ok(());
    }
    println!("Signed in as {}", format_optional(&state.display_name, "unknown"));
    println!("Role:    {}", format_optional(&state.role, "-"));
    match provider.selected_profile() {
        Some(profile) => println!("Student: {} (id {})", profile.full_name(), profile.id),
        None => println!("Student: none selected"),
    }
    Ok(())
}

fn print_profiles(profiles: &[Profile], selected: Option<&Profile>) {
    if profiles.is_empty() {
        println!("No students linked to this account.");
        return;
    }
    for profile in profiles {
        let marker = if selected.is_some_and(|s| s.id == profile.id) { "*" } else { " " };
        println!(
            "{} {:>6}  {}",
            marker,
            profile.id,
            truncate_string(&profile.full_name(), NAME_WIDTH)
        );
    }
}

pub async fn profiles(provider: &AuthProvider) -> Result<()> {
    require_session(provider)?;
    let profiles = provider.fetch_profiles().await.map_err(api_error)?;
    print_profiles(&profiles, provider.selected_profile().as_ref());
    Ok(())
}

pub async fn select(provider: &AuthProvider, id: Option<&str>) -> Result<()> {
    let Some(id) = id else {
        provider.select_profile(None).await.map_err(api_error)?;
        println!("Selection cleared.");
        return Ok(());
    };

    require_session(provider)?;
    provider.fetch_profiles().await.map_err(api_error)?;
    match provider.select_profile_by_id(id).await.map_err(api_error)? {
        Some(profile) => {
            println!("Selected {} (id {})", profile.full_name(), profile.id);
            Ok(())
        }
        None => bail!("No student with id {} on this account. Run `presente profiles`.", id),
    }
}

pub async fn subject(provider: &AuthProvider, id: &str) -> Result<()> {
    require_session(provider)?;
    let detail = provider.fetch_subject_detail(id).await.map_err(api_error)?;

    println!("{}", detail.subject_name);
    println!("Status:       {}", detail.status_label());
    println!("Mode:         {}", format_optional(&detail.mode, "-"));
    println!("Max students: {}", detail.max_students_display());
    println!("Enrolled:     {}", if detail.rolled { "yes" } else { "no" });

    if !detail.teachers.is_empty() {
        println!("Teachers:");
        for teacher in &detail.teachers {
            println!("  {}", teacher.full_name());
        }
    }
    if !detail.students.is_empty() {
        println!("Students:");
        for student in &detail.students {
            println!("  {}", truncate_string(&student.full_name(), NAME_WIDTH));
        }
    }
    Ok(())
}

pub async fn classes(provider: &AuthProvider, subject: &str, date: Option<&str>) -> Result<()> {
    let date = match date {
        Some(raw) => parse_query_date(raw)
            .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", raw))?,
        None => chrono::Local::now().date_naive(),
    };

    require_session(provider)?;
    let classes = provider.fetch_classes(subject, date).await.map_err(api_error)?;

    println!("{}", format_long_date(date));
    if classes.is_empty() {
        println!("  No classes.");
        return Ok(());
    }
    for class in &classes {
        let teachers: Vec<String> = class.staff_id.iter().map(|t| t.full_name()).collect();
        println!(
            "  {}  {:<24} {:<12} {}",
            class.time_range(),
            truncate_string(&format_optional(&class.label, "Class"), 24),
            format_optional(&class.state, "-"),
            teachers.join(", ")
        );
    }
    Ok(())
}
