//! Blind profile creation and display

use super::cancel_controls;
use crate::database::{PrefGender, YearOfStudy};
use crate::engine::{Engine, EngineError};
use crate::session::{FlowState, ProfileDraft, ProfileInput, ProfileStep, Step, AGE_RANGE};
use crate::transport::{Action, Button, Controls, Tone, UserId};
use std::sync::Arc;
use tracing::info;

/// Show the stored profile, or start creating one
pub async fn show_or_start(engine: &Arc<Engine>, user_id: UserId) -> Result<(), EngineError> {
    if let Some(profile) = engine.db.profile(user_id)?.filter(|p| p.profile_complete) {
        let text = format!(
            "👤 **Your Blind Profile**\n\n\
             Gender: {}\n\
             Age: {}\n\
             Years on campus: {}\n\
             Year of study: {}\n\
             Looking for: {}\n\
             Preferred age: {}-{}\n\n\
             Shown to partners as **{}**. Profiles cannot be edited.",
            profile.gender.label(),
            profile.age,
            profile.years_on_campus,
            profile.year_of_study.as_str(),
            profile.pref_gender.label(),
            profile.pref_age_min,
            profile.pref_age_max,
            profile.alias(),
        );
        engine
            .tell(
                user_id,
                text,
                Controls::none().row(vec![
                    Button::new("💘 Blind Connect", Action::BlindConnect).tone(Tone::Primary),
                    Button::new("🏠 Menu", Action::MainMenu),
                ]),
            )
            .await;
        return Ok(());
    }

    let gender = engine
        .db
        .gender(user_id)?
        .ok_or(EngineError::NotFound("declared gender"))?;
    let draft = ProfileDraft::new(user_id, gender);
    engine
        .tell(
            user_id,
            "👤 Let's set up your Blind Connect profile. It cannot be changed afterwards.",
            Controls::none(),
        )
        .await;
    prompt(engine, &draft).await;
    engine.sessions.set_flow(user_id, FlowState::Profile(draft));
    Ok(())
}

/// Feed one answer to the profile draft
pub async fn on_input(
    engine: &Arc<Engine>,
    user_id: UserId,
    draft: ProfileDraft,
    input: ProfileInput<'_>,
) -> Result<(), EngineError> {
    match draft.apply(input) {
        Step::Advance(next) => {
            prompt(engine, &next).await;
            engine.sessions.set_flow(user_id, FlowState::Profile(next));
            Ok(())
        }
        Step::Reprompt(same, error) => {
            engine
                .tell(user_id, format!("⚠️ {}.", error), Controls::none())
                .await;
            prompt(engine, &same).await;
            engine.sessions.set_flow(user_id, FlowState::Profile(same));
            Ok(())
        }
        Step::Complete(profile) => {
            // Any outcome ends the flow; a failed save must be started again
            engine.sessions.reset(user_id);
            engine.db.save_profile(&profile)?;
            info!(user_id, "Blind profile created");
            engine
                .tell(
                    user_id,
                    format!(
                        "✅ Profile created! Partners will see you as **{}**.",
                        profile.alias()
                    ),
                    Controls::none().row(vec![
                        Button::new("💘 Blind Connect", Action::BlindConnect).tone(Tone::Primary),
                        Button::new("🏠 Menu", Action::MainMenu),
                    ]),
                )
                .await;
            Ok(())
        }
    }
}

async fn prompt(engine: &Arc<Engine>, draft: &ProfileDraft) {
    let (text, controls) = match draft.step {
        ProfileStep::Age => (
            format!("🎂 How old are you? ({}-{})", AGE_RANGE.0, AGE_RANGE.1),
            cancel_controls(),
        ),
        ProfileStep::YearsOnCampus => (
            "🏫 How many years have you been on campus? (0-10)".to_string(),
            cancel_controls(),
        ),
        ProfileStep::YearOfStudy => (
            "📚 What is your year of study?".to_string(),
            year_choice(),
        ),
        ProfileStep::PrefGender => ("💘 Who would you like to meet?".to_string(), pref_choice()),
        ProfileStep::PrefAgeMin => (
            format!(
                "🔽 Minimum age of your match? ({}-{})",
                AGE_RANGE.0, AGE_RANGE.1
            ),
            cancel_controls(),
        ),
        ProfileStep::PrefAgeMax => (
            format!(
                "🔼 Maximum age of your match? ({}-{})",
                draft.pref_age_min().unwrap_or(AGE_RANGE.0),
                AGE_RANGE.1
            ),
            cancel_controls(),
        ),
    };
    engine.tell(draft.user_id, text, controls).await;
}

fn year_choice() -> Controls {
    Controls::none()
        .row(
            YearOfStudy::ALL
                .into_iter()
                .map(|y| Button::new(y.as_str(), Action::YearOfStudy(y)))
                .collect(),
        )
        .row(cancel_controls().rows.concat())
}

fn pref_choice() -> Controls {
    Controls::none()
        .row(
            [PrefGender::Male, PrefGender::Female, PrefGender::Both]
                .into_iter()
                .map(|p| Button::new(p.label(), Action::PrefGender(p)))
                .collect(),
        )
        .row(cancel_controls().rows.concat())
}
