use anyhow::Result;
use reveda::{Doctor, Gender, UserRecord};
use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

pub fn pp_user(user: &UserRecord, picture_url: Option<String>) -> Result<()> {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);

    stdout.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)).set_bold(true))?;
    write!(&mut stdout, "{:<40.40}", user.full_name())?;
    stdout.reset()?;
    stdout.set_color(ColorSpec::new().set_dimmed(true))?;
    writeln!(&mut stdout, "{:?}", user.role)?;
    stdout.reset()?;

    writeln!(&mut stdout, "  email: {}", user.email)?;
    writeln!(&mut stdout, "  phone: {}", user.phoneNumber)?;
    if !user.isVerified {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Red)))?;
        writeln!(&mut stdout, "  not verified")?;
        stdout.reset()?;
    }
    if let Some(url) = picture_url {
        write!(&mut stdout, "  ")?;
        stdout.set_color(
            ColorSpec::new()
                .set_fg(Some(Color::Green))
                .set_dimmed(true)
                .set_underline(true),
        )?;
        writeln!(&mut stdout, "{}", url)?;
        stdout.reset()?;
    }

    stdout.set_color(ColorSpec::new().set_dimmed(true))?;
    writeln!(&mut stdout, "  {} (joined {})", user.id, user.createdAt)?;
    stdout.reset()?;
    Ok(())
}

pub fn pp_doctor(doc: &Doctor) -> Result<()> {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);

    stdout.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)).set_bold(true))?;
    write!(&mut stdout, "Dr. {:<36.36}", format!("{} {}", doc.firstName, doc.lastName))?;
    stdout.reset()?;
    stdout.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
    writeln!(&mut stdout, "{}", doc.specialization)?;
    stdout.reset()?;

    let gender = match doc.gender {
        Gender::Male => "male",
        Gender::Female => "female",
        Gender::Other => "other",
    };
    writeln!(
        &mut stdout,
        "  {} experience, fee {}, rated {:.1}, {}",
        doc.experience, doc.fee, doc.rating, gender
    )?;
    if let Some(bio) = &doc.bio {
        if !bio.is_empty() {
            stdout.set_color(ColorSpec::new().set_italic(true))?;
            writeln!(&mut stdout, "  {:<70.70}", bio)?;
            stdout.reset()?;
        }
    }
    if !doc.kycVerify {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Red)))?;
        writeln!(&mut stdout, "  KYC pending")?;
        stdout.reset()?;
    }

    stdout.set_color(ColorSpec::new().set_dimmed(true))?;
    writeln!(&mut stdout, "  {} reg. {}\n", doc.id, doc.registrationNumber)?;
    stdout.reset()?;
    Ok(())
}

pub fn pp_doctors(doctors: &[Doctor]) -> Result<()> {
    if doctors.is_empty() {
        let mut stdout = StandardStream::stdout(ColorChoice::Auto);
        stdout.set_color(ColorSpec::new().set_dimmed(true))?;
        writeln!(&mut stdout, "no doctors listed")?;
        stdout.reset()?;
    }
    for doc in doctors {
        pp_doctor(doc)?;
    }
    Ok(())
}
