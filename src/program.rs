use crate::inst::{AbsPc, Inst, Label, LabeledInst, ParseError};
use hashbrown::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Program {
    pub insts: Vec<Inst>,
    pub labels: HashMap<Label, AbsPc>,
}

impl FromStr for Program {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut insts = Vec::default();
        let mut lines = Vec::default();
        let mut labels = HashMap::new();

        let at_line = |line: usize| {
            move |e: ParseError| ParseError::Line {
                line,
                source: Box::new(e),
            }
        };

        for (i, line) in s.lines().enumerate() {
            // Strip comments and empty lines.
            let line = line.trim();
            let line = &line[..line.find(';').unwrap_or(line.len())];
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            // Line numbers start at 1.
            let i = i + 1;

            if let Some(name) = line.strip_suffix(':') {
                let label = Label::from_str(name).map_err(at_line(i))?;
                let pc = AbsPc::try_from(insts.len()).expect("program too large");
                labels.insert(label, pc);
            } else {
                let inst = LabeledInst::from_str(line).map_err(at_line(i))?;
                insts.push(inst);
                lines.push(i);
            }
        }

        // Second pass: fix up branch and call targets.
        let insts = insts
            .into_iter()
            .zip(lines)
            .map(|(inst, i)| {
                inst.try_map_jumps(|tgt: Label| {
                    labels
                        .get(&tgt)
                        .copied()
                        .ok_or_else(|| ParseError::UndefinedLabel(tgt.0.clone()))
                })
                .map_err(at_line(i))
            })
            .collect::<Result<_, _>>()?;

        Ok(Program { insts, labels })
    }
}

impl Program {
    pub fn fetch(&self, pc: AbsPc) -> Option<&Inst> {
        self.insts.get(usize::from(pc))
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}
