/// Arguments forwarded to the job, plus the array task index if there is one
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobInvocation {
    pub args: Vec<String>,
    pub array_index: Option<u32>,
}

impl JobInvocation {
    pub fn new(args: Vec<String>, array_index: Option<u32>) -> Self {
        Self { args, array_index }
    }

    /// forwarded arguments, followed by `<index_flag> <index>` when an index is set
    pub fn argv(&self, index_flag: &str) -> Vec<String> {
        let mut argv = self.args.clone();

        if let Some(index) = self.array_index {
            argv.push(index_flag.to_string());
            argv.push(index.to_string());
        }

        argv
    }
}
