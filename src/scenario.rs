//! The scripted conversation scenario
//!
//! One fixed scenario: Lucia, the cinema employee. The scenario owns the
//! persona prompt handed to the reply generator, the opening greeting spoken
//! before the first user turn, and the canned apology used when the
//! recognizer heard nothing.

/// Reserved literal the reply generator appends when the scripted scenario
/// is complete. Stripped before display and synthesis; its presence latches
/// the conversation as finished.
pub const FINISHED_MARKER: &str = "[FINISHED]";

/// Greeting spoken when the session starts, before any user turn.
pub const GREETING: &str =
    "Hola, mi nombre es Lucia y yo trabajo aqui en el cine, ¿qué película quieres ver?";

/// Apology reply used when transcription produced no text.
pub const EMPTY_TRANSCRIPTION_REPLY: &str = "No te escuché bien, ¿puedes repetir?";

/// Identifier of the one scripted scenario.
pub const SCENARIO_ID: &str = "cine";

/// Build the generator system prompt for a scenario.
///
/// Unknown scenario ids fall back to a generic conversation-partner persona.
/// The turn counter distinguishes the first user turn (Lucia has just
/// greeted the user herself) from later turns.
#[must_use]
pub fn system_prompt(scenario: &str, turn: u64) -> String {
    if scenario != SCENARIO_ID {
        return "You are a helpful and engaging Spanish conversation partner. Respond in \
                Spanish in a natural, friendly way. Encourage the conversation to continue, \
                but keep your response concise enough for a spoken conversation (1-3 sentences)."
            .to_string();
    }

    let greeting_note = if turn == 0 {
        "You have just greeted the user and asked which movie they want to see; this is \
         their first reply. Do not greet them again."
    } else {
        "The conversation is already underway. Do not greet the user again."
    };

    format!(
        "Act as Lucia, a friendly 20-year-old female employee at a cinema.\n\
         Context: The user is learning Spanish. They likely want to practice greeting you, \
         saying they want to see \"City of God\", and saying goodbye.\n\
         {greeting_note}\n\
         Your goal:\n\
         1. Reply naturally to what they said.\n\
         2. If they ask for a ticket or mention the movie, confirm it happily.\n\
         3. If they say \"adios\", \"hasta luego\" or \"bye\", reply politely with a goodbye \
         and then STOP.\n\
         4. Keep responses short (1-2 sentences), simple Spanish suitable for a learner.\n\n\
         IMPORTANT: If the user says goodbye or adios, or if the conversation seems finished, \
         append the exact string \"{FINISHED_MARKER}\" at the very end of your response."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_turn_prompt_differs() {
        let first = system_prompt(SCENARIO_ID, 0);
        let later = system_prompt(SCENARIO_ID, 3);
        assert!(first.contains("first reply"));
        assert!(!later.contains("first reply"));
        assert!(first.contains(FINISHED_MARKER));
        assert!(later.contains(FINISHED_MARKER));
    }

    #[test]
    fn test_unknown_scenario_falls_back() {
        let prompt = system_prompt("museo", 0);
        assert!(prompt.contains("conversation partner"));
        assert!(!prompt.contains("Lucia"));
    }
}
