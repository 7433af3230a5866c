/// Reply keyboard attached to an outgoing message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplyMarkup {
    /// Leave whatever keyboard the user currently has.
    #[default]
    None,
    /// One resized button that sends [`CANCEL_BUTTON_LABEL`].
    CancelKeyboard,
    /// Remove the reply keyboard.
    RemoveKeyboard,
}

pub const CANCEL_BUTTON_LABEL: &str = "❌ Cancel";
