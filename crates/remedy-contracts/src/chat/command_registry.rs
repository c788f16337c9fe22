#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const OPTION_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "toggle",
        action: "toggle_option",
    },
    CommandSpec {
        command: "tick",
        action: "toggle_option",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "fetch",
        action: "fetch_remedies",
    },
    CommandSpec {
        command: "remedies",
        action: "fetch_remedies",
    },
    CommandSpec {
        command: "clarify",
        action: "clarify",
    },
    CommandSpec {
        command: "next",
        action: "advance_step",
    },
    CommandSpec {
        command: "voice",
        action: "start_voice",
    },
    CommandSpec {
        command: "theme",
        action: "toggle_theme",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/fetch",
    "/clarify",
    "/toggle <option|number>",
    "/next",
    "/voice",
    "/theme",
    "/reset",
    "/status",
    "/help",
    "/quit",
];
