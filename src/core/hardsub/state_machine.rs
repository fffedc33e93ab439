use crate::core::subtitle::{Channel, SrtTime};

/// 单个扫描区域的运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelRunState {
    #[default]
    Idle,
    Open {
        start_time: SrtTime,
        start_frame: u64,
        end_time: SrtTime,
        end_frame: u64,
    },
}

impl ChannelRunState {
    pub fn new() -> Self {
        ChannelRunState::Idle
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, ChannelRunState::Idle)
    }

    /// 最近一个有字帧总是作为临时结束点
    pub fn transition(
        &self,
        has_text: bool,
        frame_time: SrtTime,
        frame_index: u64,
    ) -> (ChannelRunState, RunAction) {
        match (self, has_text) {
            (ChannelRunState::Idle, true) => (
                ChannelRunState::Open {
                    start_time: frame_time,
                    start_frame: frame_index,
                    end_time: frame_time,
                    end_frame: frame_index,
                },
                RunAction::Continue,
            ),
            (
                ChannelRunState::Open {
                    start_time,
                    start_frame,
                    ..
                },
                true,
            ) => (
                ChannelRunState::Open {
                    start_time: *start_time,
                    start_frame: *start_frame,
                    end_time: frame_time,
                    end_frame: frame_index,
                },
                RunAction::Continue,
            ),
            (ChannelRunState::Open { .. }, false) => {
                (ChannelRunState::Idle, RunAction::Close(*self))
            }
            (ChannelRunState::Idle, false) => (ChannelRunState::Idle, RunAction::Continue),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAction {
    Continue,
    /// 携带被关闭时的状态快照
    Close(ChannelRunState),
}

/// 一段连续有字的区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRun {
    pub channel: Channel,
    pub start_time: SrtTime,
    pub end_time: SrtTime,
    pub start_frame: u64,
    pub end_frame: u64,
}

impl ChannelRun {
    pub fn frame_len(&self) -> u64 {
        self.end_frame - self.start_frame + 1
    }

    /// 代表帧：区间中点
    pub fn middle_frame(&self) -> u64 {
        (self.start_frame + self.end_frame) / 2
    }
}

/// 事件过滤策略。默认不做最短时长过滤，单帧闪烁也会成为事件。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPolicy {
    pub min_event_frames: u64,
}

impl Default for SegmentPolicy {
    fn default() -> Self {
        Self { min_event_frames: 1 }
    }
}

impl SegmentPolicy {
    /// 过滤掉短于 n 帧的闪烁
    pub fn debounced(min_event_frames: u64) -> Self {
        Self {
            min_event_frames: min_event_frames.max(1),
        }
    }

    fn accepts(&self, run: &ChannelRun) -> bool {
        run.frame_len() >= self.min_event_frames
    }
}

/// 单区域事件切分器
pub struct ChannelSegmenter {
    channel: Channel,
    state: ChannelRunState,
    policy: SegmentPolicy,
    finalized: Vec<ChannelRun>,
    dropped: u64,
}

impl ChannelSegmenter {
    pub fn new(channel: Channel) -> Self {
        Self::with_policy(channel, SegmentPolicy::default())
    }

    pub fn with_policy(channel: Channel, policy: SegmentPolicy) -> Self {
        Self {
            channel,
            state: ChannelRunState::new(),
            policy,
            finalized: Vec::new(),
            dropped: 0,
        }
    }

    /// 每帧调用一次，帧号递增
    pub fn observe(&mut self, has_text: bool, frame_time: SrtTime, frame_index: u64) {
        let (new_state, action) = self.state.transition(has_text, frame_time, frame_index);
        self.state = new_state;

        if let RunAction::Close(closed) = action {
            self.push_closed(closed);
        }
    }

    /// 流结束：未关闭的区间同样算作事件
    pub fn finish(mut self) -> Vec<ChannelRun> {
        let open = std::mem::take(&mut self.state);
        self.push_closed(open);
        self.finalized
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn current_state(&self) -> &ChannelRunState {
        &self.state
    }

    pub fn finalized(&self) -> &[ChannelRun] {
        &self.finalized
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    fn push_closed(&mut self, state: ChannelRunState) {
        if let ChannelRunState::Open {
            start_time,
            start_frame,
            end_time,
            end_frame,
        } = state
        {
            let run = ChannelRun {
                channel: self.channel,
                start_time,
                end_time,
                start_frame,
                end_frame,
            };
            if self.policy.accepts(&run) {
                self.finalized.push(run);
            } else {
                self.dropped += 1;
            }
        }
    }
}
