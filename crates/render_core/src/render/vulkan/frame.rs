//! Frames-in-flight scheduling
//!
//! Each frame slot owns a command buffer and a [`FrameSync`]. A slot moves
//! `Idle -> Recording -> Submitted -> Idle`; it only returns to `Idle` after
//! its in-flight fence has been observed signaled. [`FrameSlotTracker`] holds
//! that state machine without touching the GPU so it can be tested directly;
//! [`FrameScheduler`] drives it with real fences and the swapchain.

use std::collections::VecDeque;

use ash::{vk, Device};

use super::commands::CommandRecorder;
use super::context::{DeviceContext, QueueRole};
use super::error::{VulkanError, VulkanResult};
use super::swapchain::Swapchain;
use super::sync::{Fence, FrameSync, Semaphore};

/// Lifecycle state of one frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSlotState {
    /// Fence observed signaled; the slot may be re-recorded
    Idle,
    /// Command buffer is being recorded on the CPU
    Recording,
    /// Submitted to the graphics queue; fence not yet observed
    Submitted,
}

/// Round-robin frame slot state machine
///
/// At most `max(frames_in_flight - 1, 1)` slots are ever `Submitted`.
#[derive(Debug, Clone)]
pub struct FrameSlotTracker {
    states: Vec<FrameSlotState>,
    submission_order: VecDeque<usize>,
    current: usize,
    frames_advanced: u64,
}

impl FrameSlotTracker {
    /// Tracker for `frames_in_flight` slots, all idle, slot 0 current
    pub fn new(frames_in_flight: usize) -> Self {
        let frames_in_flight = frames_in_flight.max(1);
        Self {
            states: vec![FrameSlotState::Idle; frames_in_flight],
            submission_order: VecDeque::with_capacity(frames_in_flight),
            current: 0,
            frames_advanced: 0,
        }
    }

    /// Number of slots
    pub fn frames_in_flight(&self) -> usize {
        self.states.len()
    }

    /// Index of the current slot
    pub fn current(&self) -> usize {
        self.current
    }

    /// State of `slot`
    pub fn state(&self, slot: usize) -> Option<FrameSlotState> {
        self.states.get(slot).copied()
    }

    /// Slots currently `Submitted`
    pub fn submitted_count(&self) -> usize {
        self.submission_order.len()
    }

    /// Upper bound on simultaneously submitted slots
    pub fn max_submitted(&self) -> usize {
        (self.states.len() - 1).max(1)
    }

    /// Times the current slot has advanced since creation
    pub fn frames_advanced(&self) -> u64 {
        self.frames_advanced
    }

    /// Whether `slot` was submitted and its fence has not been observed yet
    pub fn is_pending(&self, slot: usize) -> bool {
        self.state(slot) == Some(FrameSlotState::Submitted)
    }

    /// Record that `slot`'s fence was observed signaled
    pub fn retire(&mut self, slot: usize) {
        if self.is_pending(slot) {
            self.states[slot] = FrameSlotState::Idle;
            self.submission_order.retain(|&s| s != slot);
        }
    }

    /// Oldest submitted slot that must retire before another submission fits
    pub fn slot_blocking_submit(&self) -> Option<usize> {
        if self.submitted_count() >= self.max_submitted() {
            self.submission_order.front().copied()
        } else {
            None
        }
    }

    /// Move the current slot from `Idle` to `Recording`
    pub fn begin_recording(&mut self) -> VulkanResult<usize> {
        let slot = self.current;
        match self.states[slot] {
            FrameSlotState::Idle => {
                self.states[slot] = FrameSlotState::Recording;
                Ok(slot)
            }
            state => Err(VulkanError::InvalidOperation {
                reason: format!("Frame slot {slot} cannot begin recording while {state:?}"),
            }),
        }
    }

    /// Move the current slot from `Recording` to `Submitted`
    pub fn submit(&mut self) -> VulkanResult<()> {
        let slot = self.current;
        if self.states[slot] != FrameSlotState::Recording {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Frame slot {slot} submitted without recording"),
            });
        }
        if self.submitted_count() >= self.max_submitted() {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Submitting slot {slot} would exceed {} frames in flight",
                    self.max_submitted()
                ),
            });
        }

        self.states[slot] = FrameSlotState::Submitted;
        self.submission_order.push_back(slot);
        Ok(())
    }

    /// Drop a recording that will not be submitted
    pub fn abandon(&mut self) {
        if self.states[self.current] == FrameSlotState::Recording {
            self.states[self.current] = FrameSlotState::Idle;
        }
    }

    /// Current slot if a frame began on it and was neither ended nor abandoned
    pub fn interrupted_recording(&self) -> Option<usize> {
        (self.states[self.current] == FrameSlotState::Recording).then_some(self.current)
    }

    /// Make the next slot current
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.states.len();
        self.frames_advanced += 1;
    }
}

/// An acquired swapchain image bound to the slot that will render it
///
/// Consumed by [`FrameScheduler::end_frame`] or [`FrameScheduler::abandon_frame`].
/// A token dropped without either is detected by the next
/// [`FrameScheduler::begin_frame`], which releases its image first.
#[derive(Debug)]
#[must_use = "a begun frame must be ended or abandoned to release its swapchain image"]
pub struct FrameToken {
    slot: usize,
    image_index: u32,
    suboptimal: bool,
    command_buffer: vk::CommandBuffer,
}

impl FrameToken {
    /// Frame slot index
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Acquired swapchain image index
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Whether the acquire reported a suboptimal swapchain
    pub fn suboptimal(&self) -> bool {
        self.suboptimal
    }

    /// The slot's command buffer, reset and ready to record
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}

/// Result of starting a frame
#[derive(Debug)]
pub enum FrameBegin {
    /// An image was acquired; record into the token's command buffer
    Ready(FrameToken),
    /// The swapchain is out of date; recreate it and skip this frame
    SwapchainStale,
}

/// Result of finishing a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented and the swapchain is still current
    Presented,
    /// Presented or dropped, and the swapchain must be recreated
    NeedsRecreate,
}

/// Swapchain image a slot acquired and has not yet presented
#[derive(Debug, Clone, Copy)]
struct HeldImage {
    swapchain: vk::SwapchainKHR,
    image_index: u32,
}

/// Per-slot synchronization and command buffers for the frame loop
pub struct FrameScheduler {
    device: Device,
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    sync: Vec<FrameSync>,
    held: Vec<Option<HeldImage>>,
    tracker: FrameSlotTracker,
}

impl FrameScheduler {
    /// Create `frames_in_flight` slots with command buffers from the graphics pool
    pub fn new(context: &DeviceContext, frames_in_flight: usize) -> VulkanResult<Self> {
        let frames_in_flight = frames_in_flight.max(1);
        let device = context.device().clone();
        let pool = context.command_pool(QueueRole::Graphics);

        let sync = (0..frames_in_flight)
            .map(|_| FrameSync::new(&device))
            .collect::<VulkanResult<Vec<_>>>()?;
        let command_buffers = pool.allocate_command_buffers(frames_in_flight as u32)?;

        log::debug!("Created {frames_in_flight} frame slots");

        Ok(Self {
            device,
            command_pool: pool.handle(),
            command_buffers,
            sync,
            held: vec![None; frames_in_flight],
            tracker: FrameSlotTracker::new(frames_in_flight),
        })
    }

    /// Slot state machine
    pub fn tracker(&self) -> &FrameSlotTracker {
        &self.tracker
    }

    /// Index of the current slot
    pub fn current_frame(&self) -> usize {
        self.tracker.current()
    }

    /// Number of slots
    pub fn frames_in_flight(&self) -> usize {
        self.tracker.frames_in_flight()
    }

    /// Wait for the current slot to retire, then acquire a swapchain image
    ///
    /// A stale swapchain advances the slot and returns
    /// [`FrameBegin::SwapchainStale`]; the fence is left signaled. A frame
    /// whose token was dropped without being ended is released first.
    pub fn begin_frame(&mut self, context: &DeviceContext, swapchain: &Swapchain) -> VulkanResult<FrameBegin> {
        if let Some(slot) = self.tracker.interrupted_recording() {
            log::warn!("Frame on slot {slot} was dropped without being ended; releasing its image");
            self.release_frame(context, swapchain, slot)?;
        }

        let slot = self.tracker.current();
        self.wait_slot(slot)?;

        let image_available = self.sync[slot].image_available.handle();
        let (image_index, suboptimal) = match swapchain.acquire_next_image(image_available) {
            Ok(acquired) => acquired,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date on acquire (slot {slot})");
                self.tracker.advance();
                return Ok(FrameBegin::SwapchainStale);
            }
            Err(e) => return Err(e.into()),
        };
        self.held[slot] = Some(HeldImage {
            swapchain: swapchain.handle(),
            image_index,
        });

        let command_buffer = self.command_buffers[slot];
        CommandRecorder::new(command_buffer, self.device.clone()).reset()?;
        self.tracker.begin_recording()?;

        Ok(FrameBegin::Ready(FrameToken {
            slot,
            image_index,
            suboptimal,
            command_buffer,
        }))
    }

    /// Submit the token's recorded command buffer and present its image
    ///
    /// The current slot always advances, whatever the outcome.
    pub fn end_frame(
        &mut self,
        context: &DeviceContext,
        swapchain: &Swapchain,
        token: FrameToken,
        resize_requested: bool,
    ) -> VulkanResult<PresentOutcome> {
        self.check_current(&token)?;

        let result = self.submit_and_present(
            context,
            swapchain,
            token.slot,
            token.image_index,
            token.suboptimal || resize_requested,
        );
        self.held[token.slot] = None;
        self.tracker.advance();
        result
    }

    /// Drop a begun frame without rendering it
    ///
    /// The acquired image is handed back to the presentation engine with
    /// undefined contents so the slot's acquire semaphore is consumed.
    pub fn abandon_frame(
        &mut self,
        context: &DeviceContext,
        swapchain: &Swapchain,
        token: FrameToken,
    ) -> VulkanResult<()> {
        self.check_current(&token)?;
        self.release_frame(context, swapchain, token.slot)
    }

    /// Block until every submitted slot has retired
    pub fn wait_all(&mut self) -> VulkanResult<()> {
        for slot in 0..self.sync.len() {
            self.wait_slot(slot)?;
        }
        Ok(())
    }

    fn check_current(&self, token: &FrameToken) -> VulkanResult<()> {
        if token.slot == self.tracker.current() {
            Ok(())
        } else {
            Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Frame token for slot {} used while slot {} is current",
                    token.slot,
                    self.tracker.current()
                ),
            })
        }
    }

    fn wait_slot(&mut self, slot: usize) -> VulkanResult<()> {
        if self.tracker.is_pending(slot) {
            self.sync[slot].in_flight.wait()?;
            self.tracker.retire(slot);
        }
        Ok(())
    }

    /// Retire submitted slots whose fences have already signaled
    fn retire_completed(&mut self) -> VulkanResult<()> {
        for slot in 0..self.sync.len() {
            if self.tracker.is_pending(slot) && self.sync[slot].in_flight.is_signaled()? {
                self.tracker.retire(slot);
            }
        }
        Ok(())
    }

    /// Give back the image held by the recording `slot`, then advance
    fn release_frame(&mut self, context: &DeviceContext, swapchain: &Swapchain, slot: usize) -> VulkanResult<()> {
        let released = match self.held[slot].take() {
            Some(held) if held.swapchain == swapchain.handle() => {
                self.present_unrendered(context, swapchain, slot, held.image_index)
            }
            // Destroying the old swapchain released the image already.
            Some(_) => self.replace_image_semaphore(slot),
            None => Ok(()),
        };

        let result = match released {
            Ok(()) => Ok(()),
            Err(e) if self.tracker.state(slot) == Some(FrameSlotState::Recording) => {
                // Nothing will wait on the acquire signal now.
                if let Err(replace_error) = self.replace_image_semaphore(slot) {
                    log::warn!("Failed to replace acquire semaphore of slot {slot}: {replace_error}");
                }
                Err(e)
            }
            Err(e) => Err(e),
        };
        self.tracker.abandon();
        self.tracker.advance();
        result
    }

    /// Transition the image straight to present layout and present it
    fn present_unrendered(
        &mut self,
        context: &DeviceContext,
        swapchain: &Swapchain,
        slot: usize,
        image_index: u32,
    ) -> VulkanResult<()> {
        let image = swapchain.image(image_index).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("Swapchain has no image {image_index}"),
        })?;
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::empty())
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build();

        let mut recorder = CommandRecorder::new(self.command_buffers[slot], self.device.clone());
        recorder.reset()?;
        recorder.begin()?;
        recorder.cmd_image_barrier(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            &[barrier],
        );
        recorder.end()?;

        self.submit_and_present(context, swapchain, slot, image_index, false)?;
        log::debug!("Released unrendered swapchain image {image_index} (slot {slot})");
        Ok(())
    }

    /// Swap in a fresh acquire semaphore once the device is idle
    fn replace_image_semaphore(&mut self, slot: usize) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(VulkanError::Api)?;
        self.sync[slot].image_available = Semaphore::new(self.device.clone())?;
        Ok(())
    }

    fn submit_and_present(
        &mut self,
        context: &DeviceContext,
        swapchain: &Swapchain,
        slot: usize,
        image_index: u32,
        force_recreate: bool,
    ) -> VulkanResult<PresentOutcome> {
        self.retire_completed()?;
        if let Some(oldest) = self.tracker.slot_blocking_submit() {
            self.wait_slot(oldest)?;
        }

        let frame_sync = &self.sync[slot];
        frame_sync.in_flight.reset()?;

        let wait_semaphores = [frame_sync.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffers[slot]];
        let signal_semaphores = [frame_sync.render_finished.handle()];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let submitted = unsafe {
            self.device.queue_submit(
                context.queue(QueueRole::Graphics),
                &[submit_info.build()],
                frame_sync.in_flight.handle(),
            )
        };
        if let Err(e) = submitted {
            // The reset fence will never signal and the acquire signal is
            // never waited on; replace both. The image stays acquired until
            // the swapchain is recreated.
            self.sync[slot].in_flight = Fence::new(self.device.clone(), true)?;
            self.replace_image_semaphore(slot)?;
            self.held[slot] = None;
            self.tracker.abandon();
            return Err(e.into());
        }
        self.tracker.submit()?;

        let render_finished = self.sync[slot].render_finished.handle();
        match swapchain.present(context.present_queue(), image_index, render_finished) {
            Ok(suboptimal) if suboptimal || force_recreate => Ok(PresentOutcome::NeedsRecreate),
            Ok(_) => Ok(PresentOutcome::Presented),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR) => {
                log::debug!("Swapchain stale on present (slot {slot})");
                Ok(PresentOutcome::NeedsRecreate)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        for (slot, sync) in self.sync.iter().enumerate() {
            if self.tracker.is_pending(slot) {
                let _ = sync.in_flight.wait();
            }
        }
        unsafe {
            self.device.free_command_buffers(self.command_pool, &self.command_buffers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_frame(tracker: &mut FrameSlotTracker) {
        let slot = tracker.current();
        tracker.retire(slot);
        tracker.begin_recording().unwrap();
        if let Some(oldest) = tracker.slot_blocking_submit() {
            tracker.retire(oldest);
        }
        tracker.submit().unwrap();
        tracker.advance();
    }

    #[test]
    fn test_slots_advance_round_robin() {
        let mut tracker = FrameSlotTracker::new(3);
        let visited: Vec<usize> = (0..7)
            .map(|_| {
                let slot = tracker.current();
                run_frame(&mut tracker);
                slot
            })
            .collect();
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(tracker.frames_advanced(), 7);
    }

    #[test]
    fn test_submitted_never_exceeds_bound() {
        for frames_in_flight in 1..=4 {
            let mut tracker = FrameSlotTracker::new(frames_in_flight);
            for _ in 0..50 {
                run_frame(&mut tracker);
                assert!(tracker.submitted_count() <= tracker.max_submitted());
                if frames_in_flight > 1 {
                    assert!(tracker.submitted_count() < frames_in_flight);
                }
            }
        }
    }

    #[test]
    fn test_submit_blocked_until_oldest_retires() {
        let mut tracker = FrameSlotTracker::new(2);
        tracker.begin_recording().unwrap();
        tracker.submit().unwrap();
        tracker.advance();

        tracker.begin_recording().unwrap();
        assert_eq!(tracker.slot_blocking_submit(), Some(0));
        assert!(tracker.submit().is_err());

        tracker.retire(0);
        assert_eq!(tracker.state(0), Some(FrameSlotState::Idle));
        tracker.submit().unwrap();
        assert_eq!(tracker.state(1), Some(FrameSlotState::Submitted));
    }

    #[test]
    fn test_pending_slot_cannot_record() {
        let mut tracker = FrameSlotTracker::new(1);
        tracker.begin_recording().unwrap();
        tracker.submit().unwrap();
        tracker.advance();

        let err = tracker.begin_recording().unwrap_err();
        assert!(matches!(err, VulkanError::InvalidOperation { .. }));

        tracker.retire(0);
        assert_eq!(tracker.begin_recording().unwrap(), 0);
    }

    #[test]
    fn test_abandon_returns_slot_to_idle() {
        let mut tracker = FrameSlotTracker::new(2);
        tracker.begin_recording().unwrap();
        tracker.abandon();
        assert_eq!(tracker.state(0), Some(FrameSlotState::Idle));
        assert!(tracker.submit().is_err());
        assert_eq!(tracker.submitted_count(), 0);
    }

    #[test]
    fn test_dropped_recording_is_detected_and_recovered() {
        let mut tracker = FrameSlotTracker::new(2);
        run_frame(&mut tracker);
        assert_eq!(tracker.interrupted_recording(), None);

        // A frame begins on slot 1 and its token is dropped.
        tracker.retire(1);
        tracker.begin_recording().unwrap();
        assert_eq!(tracker.interrupted_recording(), Some(1));
        assert!(tracker.begin_recording().is_err());

        // Release path: the unrendered image is submitted, then the slot advances.
        if let Some(oldest) = tracker.slot_blocking_submit() {
            tracker.retire(oldest);
        }
        tracker.submit().unwrap();
        tracker.abandon();
        tracker.advance();
        assert_eq!(tracker.interrupted_recording(), None);
        assert_eq!(tracker.state(1), Some(FrameSlotState::Submitted));

        let visited: Vec<usize> = (0..4)
            .map(|_| {
                let slot = tracker.current();
                run_frame(&mut tracker);
                slot
            })
            .collect();
        assert_eq!(visited, vec![0, 1, 0, 1]);
        assert!(tracker.submitted_count() <= tracker.max_submitted());
    }

    #[test]
    fn test_failed_release_leaves_slot_idle() {
        let mut tracker = FrameSlotTracker::new(3);
        tracker.begin_recording().unwrap();
        assert_eq!(tracker.interrupted_recording(), Some(0));

        tracker.abandon();
        tracker.advance();
        assert_eq!(tracker.state(0), Some(FrameSlotState::Idle));
        assert_eq!(tracker.submitted_count(), 0);
        assert_eq!(tracker.begin_recording().unwrap(), 1);
    }

    #[test]
    fn test_zero_slots_clamped_to_one() {
        let mut tracker = FrameSlotTracker::new(0);
        assert_eq!(tracker.frames_in_flight(), 1);
        tracker.advance();
        assert_eq!(tracker.current(), 0);
    }
}
